/// Values substituted into the HTML mail template.
#[derive(Debug, Clone, Copy)]
pub struct TemplateVars<'a> {
    pub ticket_url: &'a str,
    pub domain_name: &'a str,
    pub email_content: &'a str,
}

/// Replaces every `{{ticket_url}}`, `{{domain_name}}` and `{{email_content}}`.
pub fn apply_template(template: &str, vars: &TemplateVars<'_>) -> String {
    // Content goes last so placeholders inside the mail body stay literal.
    template
        .replace("{{ticket_url}}", vars.ticket_url)
        .replace("{{domain_name}}", vars.domain_name)
        .replace("{{email_content}}", vars.email_content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_template_replaces_every_occurrence() {
        let template = "<a href=\"{{ticket_url}}\">{{domain_name}}</a>{{email_content}}<i>{{domain_name}}</i>";
        let out = apply_template(
            template,
            &TemplateVars {
                ticket_url: "https://desk.example.com/t",
                domain_name: "example.com",
                email_content: "<p>hi {{ticket_url}}</p>",
            },
        );
        assert_eq!(
            out,
            "<a href=\"https://desk.example.com/t\">example.com</a><p>hi {{ticket_url}}</p><i>example.com</i>"
        );
    }
}
