use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{
    StatusCode,
    header::{ETAG, HeaderMap, LAST_MODIFIED},
};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Charset {
    Utf8,
    Windows1252,
    ShiftJis,
    Gbk,
    Big5,
    Other(String),
}

impl Charset {
    pub fn from_encoding(encoding: &'static encoding_rs::Encoding) -> Self {
        match encoding.name() {
            "UTF-8" => Self::Utf8,
            "windows-1252" => Self::Windows1252,
            "Shift_JIS" => Self::ShiftJis,
            "GBK" | "gb18030" => Self::Gbk,
            "Big5" => Self::Big5,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn encoding(&self) -> &'static encoding_rs::Encoding {
        match self {
            Self::Utf8 => encoding_rs::UTF_8,
            Self::Windows1252 => encoding_rs::WINDOWS_1252,
            Self::ShiftJis => encoding_rs::SHIFT_JIS,
            Self::Gbk => encoding_rs::GBK,
            Self::Big5 => encoding_rs::BIG5,
            Self::Other(label) => {
                encoding_rs::Encoding::for_label(label.as_bytes()).unwrap_or(encoding_rs::UTF_8)
            }
        }
    }
}

/// A fetched page, decoded to UTF-8.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub url_final: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_type: String,
    pub body_raw: Bytes,
    pub body_utf8: String,
    pub charset: Charset,
    pub fetched_at: DateTime<Utc>,
}

impl PageResponse {
    /// Build a 200 response around an HTML string. Used by fakes and tests.
    pub fn from_html(url: Url, html: impl Into<String>) -> Self {
        let html = html.into();
        Self {
            url_final: url,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            content_type: "text/html; charset=utf-8".to_string(),
            body_raw: Bytes::from(html.clone()),
            body_utf8: html,
            charset: Charset::Utf8,
            fetched_at: Utc::now(),
        }
    }

    pub fn etag(&self) -> Option<String> {
        self.header_str(ETAG)
    }

    pub fn last_modified(&self) -> Option<String> {
        self.header_str(LAST_MODIFIED)
    }

    /// XML sitemaps are recognised by content type or by their root element.
    pub fn is_xml(&self) -> bool {
        let ct = self.content_type.to_ascii_lowercase();
        if ct.contains("/xml") || (ct.contains("+xml") && !ct.contains("xhtml")) {
            return true;
        }
        let head: String = self.body_utf8.trim_start().chars().take(512).collect();
        head.starts_with("<?xml") && (head.contains("<urlset") || head.contains("<sitemapindex"))
    }

    fn header_str(&self, name: reqwest::header::HeaderName) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    }
}
