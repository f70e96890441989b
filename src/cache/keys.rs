//! Conventional cache keys for the publishing service.
//!
//! The store accepts any string; these helpers only keep call sites that
//! render and call sites that invalidate agreeing on the same names.

use std::fmt;

pub const FRONT_PAGE: &str = "front_page";
pub const FEED: &str = "rss";

/// A rendered view whose output is worth caching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ViewKey {
    /// Front-page listing of recent posts.
    FrontPage,
    /// RSS/Atom feed document.
    Feed,
    /// A single post page with its comments.
    Post(String),
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrontPage => f.write_str(FRONT_PAGE),
            Self::Feed => f.write_str(FEED),
            Self::Post(id) => write!(f, "post:{id}"),
        }
    }
}

/// A committed content mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentChange {
    /// A post was created, edited or deleted.
    Post { id: String },
    /// A comment on a post was added or removed.
    Comment { post_id: String },
}

impl ContentChange {
    /// Every view whose rendered output depends on this change.
    pub fn affected_views(&self) -> Vec<ViewKey> {
        match self {
            Self::Post { id } => vec![ViewKey::Post(id.clone()), ViewKey::FrontPage, ViewKey::Feed],
            // Listings show comment counts.
            Self::Comment { post_id } => vec![ViewKey::Post(post_id.clone()), ViewKey::FrontPage],
        }
    }

    pub fn affected_keys(&self) -> Vec<String> {
        self.affected_views()
            .iter()
            .map(ViewKey::to_string)
            .collect()
    }
}
