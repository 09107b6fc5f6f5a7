//! URLパターンによるページ判定
//!
//! ルールは登録順に試し、最初に一致したものを採用する。
//! パターンはURL先頭に固定した正規表現:
//!
//! - `https://…` / `http://…` はそのまま使う
//! - `/path` はベースURLのオリジンからの相対
//! - それ以外はベースURLからの相対
//!
//! 名前付きグループ (`(?P<subid>\d+)`) はパラメータとしてパーサに渡る。

use std::collections::HashMap;
use std::fmt::Debug;

use regex::Regex;
use url::Url;

use crate::error::{ConnectorError, Result};

#[derive(Debug, Clone)]
struct NavigationRule<K> {
    kind: K,
    patterns: Vec<Regex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<K> {
    pub kind: K,
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct NavigationMap<K> {
    base_url: Url,
    rules: Vec<NavigationRule<K>>,
}

pub struct NavigationMapBuilder<K> {
    base_url: String,
    rules: Vec<(K, Vec<String>)>,
}

impl<K> NavigationMapBuilder<K> {
    pub fn rule(mut self, kind: K, patterns: &[&str]) -> Self {
        self.rules
            .push((kind, patterns.iter().map(|p| p.to_string()).collect()));
        self
    }

    pub fn build(self) -> Result<NavigationMap<K>> {
        let base_url = Url::parse(&self.base_url)?;
        let origin = base_url.origin().ascii_serialization();
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        let mut rules = Vec::with_capacity(self.rules.len());
        for (kind, patterns) in self.rules {
            let compiled = patterns
                .iter()
                .map(|pattern| compile(pattern, &origin, &base))
                .collect::<Result<Vec<_>>>()?;
            rules.push(NavigationRule {
                kind,
                patterns: compiled,
            });
        }

        Ok(NavigationMap { base_url, rules })
    }
}

fn compile(pattern: &str, origin: &str, base: &str) -> Result<Regex> {
    let source = if pattern.starts_with("http://") || pattern.starts_with("https://") {
        format!("^(?:{})", pattern)
    } else if let Some(path) = pattern.strip_prefix('/') {
        format!("^{}/(?:{})", regex::escape(origin), path)
    } else {
        format!("^{}(?:{})", regex::escape(base), pattern)
    };
    Regex::new(&source)
        .map_err(|e| ConnectorError::Config(format!("bad URL pattern {:?}: {}", pattern, e)))
}

impl<K: Copy + Eq + Debug> NavigationMap<K> {
    pub fn builder(base_url: impl Into<String>) -> NavigationMapBuilder<K> {
        NavigationMapBuilder {
            base_url: base_url.into(),
            rules: Vec::new(),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `target` (絶対・相対) をベースURLに対して解決
    pub fn absolute(&self, target: &str) -> Result<String> {
        Ok(self.base_url.join(target)?.to_string())
    }

    pub fn resolve(&self, address: &str) -> Result<Resolution<K>> {
        for rule in &self.rules {
            for pattern in &rule.patterns {
                if let Some(caps) = pattern.captures(address) {
                    let params = pattern
                        .capture_names()
                        .flatten()
                        .filter_map(|name| {
                            caps.name(name)
                                .map(|m| (name.to_string(), m.as_str().to_string()))
                        })
                        .collect();
                    return Ok(Resolution {
                        kind: rule.kind,
                        params,
                    });
                }
            }
        }
        Err(ConnectorError::UnrecognizedPage {
            url: address.to_string(),
        })
    }

    /// `address` が `kind` と判定されるか
    pub fn matches(&self, kind: K, address: &str) -> bool {
        self.resolve(address).map(|r| r.kind == kind).unwrap_or(false)
    }
}
