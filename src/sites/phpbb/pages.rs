use chrono::NaiveDateTime;
use scraper::ElementRef;
use url::Url;

use crate::capabilities::{Contact, ContactStatus, Message, Thread};
use crate::error::{ConnectorError, Result};
use crate::navigation::NavigationMap;
use crate::page::ResolvedPage;
use crate::pagination::PageOutcome;
use crate::parse::{attr, cells, form_inputs, selector, text};
use crate::site_ensure;
use crate::transport::HttpRequest;

pub const LOGIN_URL: &str = "ucp.php?mode=login";
pub const LOGOUT_URL: &str = "ucp.php?mode=logout";
pub const INDEX_URL: &str = "index.php";
pub const MEMBERS_URL: &str = "memberlist.php";
pub const WHO_IS_ONLINE_URL: &str = "viewonline.php";

const DATE_FORMAT: &str = "%a %b %d, %Y %I:%M %p";
const FORUM_TITLE_MAX: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhpbbPage {
    Index,
    Forum,
    Topic,
    Login,
    Members,
    WhoIsOnline,
}

pub fn navigation(base_url: &str) -> Result<NavigationMap<PhpbbPage>> {
    NavigationMap::builder(base_url)
        .rule(PhpbbPage::Login, &[r"ucp\.php\?mode=login"])
        .rule(PhpbbPage::Forum, &[r"viewforum\.php\?(.*&)?f=(?P<f>\d+)"])
        .rule(PhpbbPage::Topic, &[r"viewtopic\.php\?(.*&)?t=(?P<t>\d+)"])
        .rule(PhpbbPage::Members, &[r"memberlist\.php"])
        .rule(PhpbbPage::WhoIsOnline, &[r"viewonline\.php"])
        .rule(PhpbbPage::Index, &[r"(index\.php)?(\?.*)?$", r"ucp\.php"])
        .build()
}

pub fn topic_url(thread_id: &str) -> String {
    format!("viewtopic.php?t={}", thread_id)
}

/// Login form with the user's fields filled in.
pub fn login_request(page: &ResolvedPage<PhpbbPage>, username: &str, password: &str) -> Result<HttpRequest> {
    let doc = page.html();
    let sel = selector("form#login")?;
    let form = doc
        .select(&sel)
        .next()
        .ok_or_else(|| ConnectorError::SiteAssertion(format!("no login form on {}", page.url)))?;

    let action = resolve_link(&page.url, attr(form, "action").unwrap_or(&page.url))?;
    let mut fields = form_inputs(form, &["hidden"])?;
    fields.push(("username".to_string(), username.to_string()));
    fields.push(("password".to_string(), password.to_string()));
    fields.push(("login".to_string(), "Login".to_string()));
    Ok(HttpRequest::post_form(action, fields))
}

pub fn login_error(page: &ResolvedPage<PhpbbPage>) -> Result<String> {
    let doc = page.html();
    let sel = selector("form#login .error, div.error")?;
    let error = doc.select(&sel).map(text).find(|t| !t.is_empty());
    Ok(error.unwrap_or_else(|| "login refused".to_string()))
}

fn resolve_link(page_url: &str, link: &str) -> Result<String> {
    Ok(Url::parse(page_url)?.join(link)?.to_string())
}

fn query_value(link: &str, name: &str) -> Option<String> {
    Url::parse(link)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Shortened forum title used as a thread title prefix.
pub fn short_title(title: &str) -> String {
    if title.chars().count() <= FORUM_TITLE_MAX {
        return title.to_string();
    }
    let mut short: String = title.chars().take(FORUM_TITLE_MAX).collect();
    short.push('…');
    short
}

/// What a forum (or the index) lists.
#[derive(Debug, Clone, Default)]
pub struct ForumListing {
    pub title: String,
    pub subforums: Vec<String>,
    pub topics: Vec<Thread>,
    pub next: Option<String>,
}

fn next_link(doc: &::scraper::Html, page_url: &str) -> Result<Option<String>> {
    let sel = selector("a.right-box")?;
    doc.select(&sel)
        .next()
        .and_then(|a| attr(a, "href"))
        .map(|href| resolve_link(page_url, href))
        .transpose()
}

pub fn parse_forum(page: &ResolvedPage<PhpbbPage>) -> Result<ForumListing> {
    let doc = page.html();
    let title_sel = selector("h2 a, h2")?;
    let forum_sel = selector("a.forumtitle")?;
    let topic_sel = selector("ul.topics li.row")?;
    let link_sel = selector("a.topictitle")?;
    let posts_sel = selector("dd.posts")?;

    let title = doc.select(&title_sel).next().map(text).unwrap_or_default();
    let prefix = short_title(&title);

    let mut subforums = Vec::new();
    for a in doc.select(&forum_sel) {
        if let Some(href) = attr(a, "href") {
            subforums.push(resolve_link(&page.url, href)?);
        }
    }

    let mut topics = Vec::new();
    for row in doc.select(&topic_sel) {
        let Some(link) = row.select(&link_sel).next() else {
            continue;
        };
        let Some(href) = attr(link, "href") else {
            continue;
        };
        let Some(id) = query_value(&resolve_link(&page.url, href)?, "t") else {
            continue;
        };
        let name = text(link);
        let thread_title = if prefix.is_empty() {
            name
        } else {
            format!("[{}] {}", prefix, name)
        };
        let mut thread = Thread::new(id, thread_title);
        let replies = row
            .select(&posts_sel)
            .next()
            .map(text)
            .and_then(|t| t.split_whitespace().next().and_then(|n| n.parse::<usize>().ok()))
            .unwrap_or(0);
        thread.nb_messages = replies + 1;
        topics.push(thread);
    }

    Ok(ForumListing {
        title,
        subforums,
        topics,
        next: next_link(&doc, &page.url)?,
    })
}

/// `Page n of m` counter of a topic page; impossible values are assertions.
fn page_counter(doc: &::scraper::Html) -> Result<Option<(usize, usize)>> {
    let sel = selector("div.pagination strong")?;
    let numbers: Vec<String> = doc.select(&sel).map(text).collect();
    if numbers.len() < 2 {
        return Ok(None);
    }
    let parse = |s: &String| {
        s.parse::<usize>()
            .map_err(|_| ConnectorError::SiteAssertion(format!("page counter {:?}", s)))
    };
    let current = parse(&numbers[0])?;
    let total = parse(&numbers[1])?;
    site_ensure!(
        current >= 1 && current <= total,
        "impossible page counter {} / {}",
        current,
        total
    );
    Ok(Some((current, total)))
}

fn post_date(author_line: &str) -> Option<NaiveDateTime> {
    let raw = author_line.rsplit('»').next()?.trim();
    NaiveDateTime::parse_from_str(raw, DATE_FORMAT).ok()
}

fn inner(el: Option<ElementRef<'_>>) -> Option<String> {
    el.map(|e| e.inner_html().trim().to_string())
        .filter(|html| !html.is_empty())
}

/// Posts of one topic page. `parent` is the last post id seen so far and is
/// advanced past every post of the page.
pub fn parse_topic(
    page: &ResolvedPage<PhpbbPage>,
    thread_id: &str,
    parent: &mut Option<String>,
    title: &mut Option<String>,
) -> Result<PageOutcome<Message>> {
    let doc = page.html();
    let post_sel = selector("div.post")?;
    let subject_sel = selector("h3")?;
    let author_sel = selector("p.author")?;
    let name_sel = selector("strong")?;
    let content_sel = selector("div.content")?;
    let signature_sel = selector("div.signature")?;

    if title.is_none() {
        let sel = selector("h2 a, h2")?;
        *title = doc.select(&sel).next().map(text);
    }

    let mut messages = Vec::new();
    for post in doc.select(&post_sel) {
        let Some(post_id) = attr(post, "id").and_then(|id| id.strip_prefix('p')) else {
            continue;
        };
        let author = post.select(&author_sel).next();
        let id = format!("{}.{}", thread_id, post_id);
        messages.push(Message {
            id: id.clone(),
            thread_id: thread_id.to_string(),
            title: post.select(&subject_sel).next().map(text).unwrap_or_default(),
            sender: author
                .and_then(|a| a.select(&name_sel).next())
                .map(text)
                .unwrap_or_default(),
            date: author.map(text).as_deref().and_then(post_date),
            content: inner(post.select(&content_sel).next()).unwrap_or_default(),
            signature: inner(post.select(&signature_sel).next()),
            parent_id: parent.replace(id),
        });
    }

    let next = match page_counter(&doc)? {
        Some((current, total)) if current < total => {
            let link = next_link(&doc, &page.url)?.ok_or_else(|| {
                ConnectorError::SiteAssertion(format!(
                    "page {} of {} without a next link at {}",
                    current, total, page.url
                ))
            })?;
            Some(HttpRequest::get(link))
        }
        _ => None,
    };
    Ok(PageOutcome::with_next(messages, next))
}

/// Member list; everyone starts offline.
pub fn parse_members(page: &ResolvedPage<PhpbbPage>) -> Result<PageOutcome<Contact>> {
    let doc = page.html();
    let rows = selector("table#memberlist tbody tr")?;
    let link_sel = selector(r#"a[href*="mode=viewprofile"]"#)?;

    let mut members = Vec::new();
    for row in doc.select(&rows) {
        let tds = cells(row);
        let Some(link) = tds.first().and_then(|td| td.select(&link_sel).next()) else {
            continue;
        };
        let Some(href) = attr(link, "href") else {
            continue;
        };
        let url = resolve_link(&page.url, href)?;
        let Some(id) = query_value(&url, "u") else {
            continue;
        };

        let mut contact = Contact::new(id, text(link), ContactStatus::Offline);
        if let Some(posts) = tds.get(1).map(|td| text(*td)).filter(|t| !t.is_empty()) {
            contact.profile.insert("posts".to_string(), posts);
        }
        if let Some(joined) = tds.last().filter(|_| tds.len() > 2).map(|td| text(*td)) {
            contact.profile.insert("joined".to_string(), joined);
        }
        contact.url = Some(url);
        members.push(contact);
    }

    let next = next_link(&doc, &page.url)?.map(HttpRequest::get);
    Ok(PageOutcome::with_next(members, next))
}

/// Ids of the members listed on "who is online".
pub fn parse_online_ids(page: &ResolvedPage<PhpbbPage>) -> Result<Vec<String>> {
    let doc = page.html();
    let sel = selector(r#"table.table1 tbody tr td a[href*="mode=viewprofile"]"#)?;
    let mut ids = Vec::new();
    for a in doc.select(&sel) {
        let Some(href) = attr(a, "href") else {
            continue;
        };
        if let Some(id) = query_value(&resolve_link(&page.url, href)?, "u") {
            ids.push(id);
        }
    }
    Ok(ids)
}
