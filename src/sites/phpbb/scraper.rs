use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::capabilities::{
    Contact, ContactFilter, ContactProvider, ContactStatus, MessagesProvider, Thread,
};
use crate::config::{ConnectorConfig, Credentials};
use crate::error::{ConnectorError, Result};
use crate::pagination::Paginator;
use crate::session::Session;
use crate::traits::{impl_connector, LoginFlow};
use crate::transport::{HttpRequest, Transport};

use super::pages::{self, PhpbbPage};

struct PhpbbLogin;

#[async_trait]
impl LoginFlow<PhpbbPage> for PhpbbLogin {
    async fn login(&self, session: &mut Session<PhpbbPage>, credentials: &Credentials) -> Result<()> {
        if credentials.is_empty() {
            debug!("No credentials, browsing anonymously");
            return Ok(());
        }

        let page = session.get(pages::LOGIN_URL).await?;
        let request = pages::login_request(&page, &credentials.username, &credentials.password)?;
        let page = session.fetch(request).await?;
        if page.kind == PhpbbPage::Login {
            return Err(ConnectorError::InvalidCredentials(pages::login_error(&page)?));
        }
        Ok(())
    }

    fn is_login_page(&self, kind: PhpbbPage) -> bool {
        kind == PhpbbPage::Login
    }

    async fn logout(&self, session: &mut Session<PhpbbPage>) -> Result<()> {
        if session.config().credentials.is_empty() {
            return Ok(());
        }
        session.fetch_raw(HttpRequest::get(pages::LOGOUT_URL)).await?;
        Ok(())
    }
}

/// phpBB forums: topics as threads, members as contacts.
pub struct PhpbbConnector {
    session: Session<PhpbbPage>,
}

impl PhpbbConnector {
    /// Forums live anywhere, so the base URL is mandatory.
    pub fn new(config: ConnectorConfig, transport: Box<dyn Transport>) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| ConnectorError::Config("phpbb needs the forum base URL".into()))?;
        let navigation = pages::navigation(&base_url)?;
        Ok(Self {
            session: Session::new(config, transport, navigation, PhpbbLogin),
        })
    }

    pub fn session(&self) -> &Session<PhpbbPage> {
        &self.session
    }
}

impl_connector!(PhpbbConnector, "phpbb");

#[async_trait]
impl MessagesProvider for PhpbbConnector {
    /// Walks the index and every sub-forum breadth first.
    async fn iter_threads(&mut self) -> Result<Vec<Thread>> {
        let cap = self.session.config().max_pages;
        let start = self.session.absolute(pages::INDEX_URL)?;

        let mut queue = VecDeque::from([start]);
        let mut visited = HashSet::new();
        let mut threads: Vec<Thread> = Vec::new();

        while let Some(url) = queue.pop_front() {
            if !visited.insert(url.clone()) {
                continue;
            }
            if visited.len() > cap {
                warn!("Forum walk stopped after {} pages", cap);
                break;
            }

            let page = self
                .session
                .fetch_expecting(HttpRequest::get(&url), &[PhpbbPage::Index, PhpbbPage::Forum])
                .await?;
            let listing = pages::parse_forum(&page)?;
            debug!(
                "{:?}: {} sub-forums, {} topics",
                listing.title,
                listing.subforums.len(),
                listing.topics.len()
            );

            queue.extend(listing.subforums);
            queue.extend(listing.next);
            for topic in listing.topics {
                if !threads.iter().any(|t| t.id == topic.id) {
                    threads.push(topic);
                }
            }
        }
        info!("{} threads", threads.len());
        Ok(threads)
    }

    async fn get_thread(&mut self, thread_id: &str) -> Result<Thread> {
        let mut parent = None;
        let mut title = None;
        let messages = Paginator::new(
            HttpRequest::get(pages::topic_url(thread_id)),
            &[PhpbbPage::Topic],
            |page| pages::parse_topic(page, thread_id, &mut parent, &mut title),
        )
        .collect(&mut self.session)
        .await?;

        let mut thread = Thread::new(thread_id, title.unwrap_or_default());
        thread.date = messages.first().and_then(|m| m.date);
        thread.nb_messages = messages.len();
        thread.messages = messages;
        Ok(thread)
    }
}

#[async_trait]
impl ContactProvider for PhpbbConnector {
    async fn iter_contacts(&mut self, filter: &ContactFilter) -> Result<Vec<Contact>> {
        let members = Paginator::new(
            HttpRequest::get(pages::MEMBERS_URL),
            &[PhpbbPage::Members],
            pages::parse_members,
        )
        .collect(&mut self.session)
        .await?;

        let page = self
            .session
            .fetch_expecting(
                HttpRequest::get(pages::WHO_IS_ONLINE_URL),
                &[PhpbbPage::WhoIsOnline],
            )
            .await?;
        let online = pages::parse_online_ids(&page)?;

        Ok(members
            .into_iter()
            .map(|mut contact| {
                if online.contains(&contact.id) {
                    contact.status = ContactStatus::Online;
                }
                contact
            })
            .filter(|contact| filter.matches(contact))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::traits::Connector;
    use crate::transport::MockTransport;

    const BASE: &str = "https://forum.example.org/";
    const INDEX: &str = "https://forum.example.org/index.php";
    const LOGIN: &str = "https://forum.example.org/ucp.php?mode=login";

    const LOGIN_HTML: &str = r#"<form id="login" action="./ucp.php?mode=login">
        <input type="hidden" name="sid" value="s1"/><input type="text" name="username"/></form>"#;

    fn connector(mock: &MockTransport, username: &str) -> PhpbbConnector {
        let config = ConnectorConfig::new(username, if username.is_empty() { "" } else { "secret" })
            .with_base_url(BASE)
            .with_retry_backoff(Duration::ZERO);
        PhpbbConnector::new(config, Box::new(mock.clone())).unwrap()
    }

    fn forum_html(title: &str, subforums: &[u32], topics: &[(u32, &str, u32)]) -> String {
        let forums: String = subforums
            .iter()
            .map(|f| format!(r#"<a class="forumtitle" href="./viewforum.php?f={}">F{}</a>"#, f, f))
            .collect();
        let rows: String = topics
            .iter()
            .map(|(t, name, replies)| {
                format!(
                    r#"<li class="row"><a class="topictitle" href="./viewtopic.php?f=1&amp;t={}">{}</a><dd class="posts">{} <dfn>Réponses</dfn></dd></li>"#,
                    t, name, replies
                )
            })
            .collect();
        format!(r#"<h2>{}</h2>{}<ul class="topics">{}</ul>"#, title, forums, rows)
    }

    #[tokio::test]
    async fn test_anonymous_browsing_needs_no_login() {
        let mock = MockTransport::new();
        mock.push_html(INDEX, &forum_html("", &[], &[]));
        let mut forum = connector(&mock, "");

        assert!(forum.iter_threads().await.unwrap().is_empty());
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let mock = MockTransport::new();
        mock.push_html(LOGIN, LOGIN_HTML).push_html(
            LOGIN,
            r#"<form id="login"><div class="error">Mot de passe incorrect</div></form>"#,
        );
        let mut forum = connector(&mock, "alice");

        assert!(matches!(
            forum.ensure_authenticated().await,
            Err(ConnectorError::InvalidCredentials(_))
        ));
        assert_eq!(mock.requests()[1].form_value("sid"), Some("s1"));
    }

    #[tokio::test]
    async fn test_threads_walk_sub_forums_once() {
        let mock = MockTransport::new();
        mock.push_html(INDEX, &forum_html("", &[1, 2], &[]))
            .push_html(
                "https://forum.example.org/viewforum.php?f=1",
                &forum_html("Discussions générales du forum", &[2], &[(10, "Bienvenue", 3)]),
            )
            .push_html(
                "https://forum.example.org/viewforum.php?f=2",
                &forum_html("Annonces", &[1], &[(11, "Règles", 0)]),
            );
        let mut forum = connector(&mock, "");

        let threads = forum.iter_threads().await.unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].title, "[Discussions générale…] Bienvenue");
        assert_eq!(threads[0].nb_messages, 4);
        assert_eq!(threads[1].title, "[Annonces] Règles");
        assert_eq!(mock.request_count(), 3);
    }

    #[tokio::test]
    async fn test_thread_over_two_pages() {
        let post = |id: u32, author: &str| {
            format!(
                r#"<div class="post" id="p{}"><h3>Sujet</h3><p class="author">par <strong>{}</strong> » Fri Feb 03, 2017 2:05 pm</p><div class="content">m{}</div></div>"#,
                id, author, id
            )
        };
        let mock = MockTransport::new();
        mock.push_html(
            "https://forum.example.org/viewtopic.php?t=10",
            &format!(
                r#"<h2>Bienvenue</h2><div class="pagination"><strong>1</strong> / <strong>2</strong>
                <a class="right-box" href="./viewtopic.php?t=10&amp;start=10">Suivante</a></div>{}{}"#,
                post(1, "alice"),
                post(2, "bob")
            ),
        )
        .push_html(
            "https://forum.example.org/viewtopic.php?t=10&start=10",
            &format!(
                r#"<h2>Bienvenue</h2><div class="pagination"><strong>2</strong> / <strong>2</strong></div>{}"#,
                post(3, "alice")
            ),
        );
        let mut forum = connector(&mock, "");

        let thread = forum.get_thread("10").await.unwrap();
        assert_eq!(thread.title, "Bienvenue");
        assert_eq!(thread.nb_messages, 3);
        let parents: Vec<Option<&str>> = thread.messages.iter().map(|m| m.parent_id.as_deref()).collect();
        assert_eq!(parents, vec![None, Some("10.1"), Some("10.2")]);
        assert!(thread.date.is_some());
    }

    #[tokio::test]
    async fn test_contacts_with_online_status() {
        let mock = MockTransport::new();
        mock.push_html(
            "https://forum.example.org/memberlist.php",
            r#"<table id="memberlist"><tbody>
               <tr><td><a href="./memberlist.php?mode=viewprofile&amp;u=2">alice</a></td><td>42</td><td>Jan 01, 2015</td></tr>
               <tr><td><a href="./memberlist.php?mode=viewprofile&amp;u=3">bob</a></td><td>7</td><td>Mar 02, 2016</td></tr>
               </tbody></table>"#,
        )
        .push_html(
            "https://forum.example.org/viewonline.php",
            r#"<table class="table1"><tbody>
               <tr><td><a href="./memberlist.php?mode=viewprofile&amp;u=3">bob</a></td></tr>
               </tbody></table>"#,
        );
        let mut forum = connector(&mock, "");

        let online = forum
            .iter_contacts(&ContactFilter::all().with_status(ContactStatus::Online))
            .await
            .unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].name, "bob");
    }
}
