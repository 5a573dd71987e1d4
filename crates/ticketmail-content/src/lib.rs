mod quote;
mod template;

use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use chrono::{Local, NaiveDateTime, TimeZone};
use mailparse::{MailAddr, MailHeaderMap, ParsedMail};
use regex::Regex;

pub use quote::{QuotedThread, render_quoted_thread};
pub use template::{TemplateVars, apply_template};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub address: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// An inbound message reduced to the fields the ticket pipeline stores.
#[derive(Debug, Clone)]
pub struct ParsedEmail {
    pub date: NaiveDateTime,
    pub from: Option<Address>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
}

impl ParsedEmail {
    /// Plain content, falling back to the tag-stripped HTML body.
    pub fn content(&self) -> String {
        if self.text.trim().is_empty() {
            strip_html_tags(&self.html)
        } else {
            self.text.clone()
        }
    }

    /// HTML content with remote `<base>` and `<style>` removed, falling back
    /// to the plain body.
    pub fn content_html(&self) -> String {
        if self.html.trim().is_empty() {
            self.text.clone()
        } else {
            clean_inbound_html(&self.html)
        }
    }

    pub fn from_address(&self) -> &str {
        self.from.as_ref().map(|f| f.address.as_str()).unwrap_or("")
    }

    pub fn from_name(&self) -> Option<&str> {
        self.from.as_ref().and_then(|f| f.name.as_deref())
    }
}

pub fn parse_message(raw: &[u8]) -> Result<ParsedEmail> {
    let parsed = mailparse::parse_mail(raw)?;
    let headers = &parsed.headers;

    let date = headers
        .get_first_value("Date")
        .and_then(|value| mailparse::dateparse(&value).ok())
        .and_then(|ts| Local.timestamp_opt(ts, 0).single())
        .map(|dt| dt.naive_local())
        .unwrap_or_else(|| Local::now().naive_local());

    let from = address_list(&parsed, "From").into_iter().next();
    if from.is_none() {
        return Err(anyhow!("message has no From address"));
    }

    let (text, html) = select_bodies(&parsed);
    let mut attachments = Vec::new();
    collect_attachments(&parsed, &mut attachments)?;

    Ok(ParsedEmail {
        date,
        from,
        to: addresses_only(&parsed, "To"),
        cc: addresses_only(&parsed, "Cc"),
        bcc: addresses_only(&parsed, "Bcc"),
        subject: headers.get_first_value("Subject").unwrap_or_default(),
        text,
        html,
        attachments,
    })
}

fn address_list(parsed: &ParsedMail, header: &str) -> Vec<Address> {
    let Some(header) = parsed.headers.get_first_header(header) else {
        return Vec::new();
    };
    let Ok(list) = mailparse::addrparse_header(header) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in list.iter() {
        match entry {
            MailAddr::Single(info) => out.push(Address {
                address: info.addr.trim().to_string(),
                name: non_empty(info.display_name.as_deref()),
            }),
            MailAddr::Group(group) => {
                for info in &group.addrs {
                    out.push(Address {
                        address: info.addr.trim().to_string(),
                        name: non_empty(info.display_name.as_deref()),
                    });
                }
            }
        }
    }
    out
}

fn addresses_only(parsed: &ParsedMail, header: &str) -> Vec<String> {
    address_list(parsed, header)
        .into_iter()
        .map(|a| a.address)
        .filter(|a| !a.is_empty())
        .collect()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn select_bodies(parsed: &ParsedMail) -> (String, String) {
    let mut text: Option<String> = None;
    let mut html: Option<String> = None;
    walk_parts(parsed, &mut |part| {
        if !part.subparts.is_empty() || is_attachment(part) {
            return;
        }
        let ctype = part.ctype.mimetype.to_lowercase();
        if ctype == "text/plain" && text.is_none() {
            text = part.get_body().ok();
        }
        if ctype == "text/html" && html.is_none() {
            html = part.get_body().ok();
        }
    });
    (text.unwrap_or_default(), html.unwrap_or_default())
}

fn walk_parts<F>(parsed: &ParsedMail, cb: &mut F)
where
    F: FnMut(&ParsedMail),
{
    cb(parsed);
    for part in &parsed.subparts {
        walk_parts(part, cb);
    }
}

fn attachment_name(part: &ParsedMail) -> Option<String> {
    part.get_content_disposition()
        .params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned())
}

fn is_attachment(part: &ParsedMail) -> bool {
    matches!(
        part.get_content_disposition().disposition,
        mailparse::DispositionType::Attachment
    ) || attachment_name(part).is_some()
}

fn collect_attachments(parsed: &ParsedMail, out: &mut Vec<Attachment>) -> Result<()> {
    if parsed.subparts.is_empty() {
        if is_attachment(parsed) {
            out.push(Attachment {
                filename: attachment_name(parsed).unwrap_or_else(|| "attachment".to_string()),
                content_type: parsed.ctype.mimetype.to_lowercase(),
                data: parsed.get_body_raw()?,
            });
        }
        return Ok(());
    }
    for part in &parsed.subparts {
        collect_attachments(part, out)?;
    }
    Ok(())
}

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[^>]+(>|$)").expect("tag pattern compiles"));
static BASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<base[^>]*>").expect("base pattern compiles"));
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("style pattern compiles"));
static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("address pattern compiles"));

pub fn strip_html_tags(html: &str) -> String {
    TAG_RE.replace_all(html, "").into_owned()
}

/// Drops the first `<base>` tag and every `<style>` block.
pub fn clean_inbound_html(html: &str) -> String {
    let without_base = BASE_RE.replace(html, "");
    STYLE_RE.replace_all(&without_base, "").into_owned()
}

pub fn nl2br(value: &str) -> String {
    value.replace('\n', "<br>")
}

/// Replaces characters that filesystems reject with `-`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|ch| match ch {
            '\\' | '/' | '?' | ':' | '*' | '"' | '>' | '<' | '|' => '-',
            other => other,
        })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "attachment".to_string()
    } else {
        cleaned.to_string()
    }
}

pub fn is_deliverable_address(address: &str) -> bool {
    ADDRESS_RE.is_match(address)
}

/// Splits a `;`-joined address list, keeping only well-formed addresses.
pub fn split_addresses(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or("")
        .split(';')
        .map(str::trim)
        .filter(|a| is_deliverable_address(a))
        .map(str::to_string)
        .collect()
}
