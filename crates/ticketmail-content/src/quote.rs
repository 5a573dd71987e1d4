use ticketmail_core::{Email, parse_timestamp};

const SEPARATOR: &str = "\r\n\r\n________________________________\r\n";
const SEPARATOR_HTML: &str =
    "<br><br><hr tabindex=\"-1\" style=\"display:inline-block; width:98%\">";
const SENT_FORMAT: &str = "%A, %d %B, %Y %H:%M";

/// Earlier messages of a ticket rendered as a reply quote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotedThread {
    pub text: String,
    pub html: String,
}

/// Renders every email after the first as a quoted block.
///
/// `emails` is expected newest first, with the email being sent at the head,
/// which is why the head is skipped.
pub fn render_quoted_thread(emails: &[Email]) -> QuotedThread {
    let mut thread = QuotedThread::default();
    for email in emails.iter().skip(1) {
        let sent = email
            .email_date
            .as_deref()
            .map(|raw| match parse_timestamp(raw) {
                Some(at) => at.format(SENT_FORMAT).to_string(),
                None => raw.to_string(),
            })
            .unwrap_or_default();
        let to = joined(email.email_to.as_deref());
        let cc = joined(email.email_cc.as_deref());
        let subject = email.subject.as_deref().unwrap_or("");

        let cc_text = if cc.is_empty() {
            String::new()
        } else {
            format!("\r\nCc: {}", cc)
        };
        let info = [
            format!("From: {}", email.email_from),
            format!("Sent: {}", sent),
            format!("To: {}{}", to, cc_text),
            format!("Subject: {}", subject),
            email.content.clone().unwrap_or_default(),
        ];
        thread.text.push_str(SEPARATOR);
        thread.text.push_str(&info.join("\r\n"));

        let cc_html = if cc.is_empty() {
            String::new()
        } else {
            format!("<br><strong>Cc</strong>: {}", html_escape::encode_text(&cc))
        };
        let info_html = [
            format!(
                "<strong>From</strong>: {}",
                html_escape::encode_text(&email.email_from)
            ),
            format!("<strong>Sent</strong>: {}", sent),
            format!(
                "<strong>To</strong>: {}{}",
                html_escape::encode_text(&to),
                cc_html
            ),
            format!(
                "<strong>Subject</strong>: {}",
                html_escape::encode_text(subject)
            ),
            email.content_html.clone().unwrap_or_default(),
        ];
        thread.html.push_str(SEPARATOR_HTML);
        thread.html.push_str(&info_html.join("<br>"));
    }
    thread
}

fn joined(list: Option<&str>) -> String {
    list.unwrap_or("").replace(';', ",")
}
