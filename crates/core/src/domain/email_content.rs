use scraper::{Html, Node};

use crate::domain::newsletter::ContentItem;

pub const EXCERPT_CHARS: usize = 300;

/// Site-wide pieces of the newsletter layout.
#[derive(Debug, Clone)]
pub struct EmailTemplate {
    pub site_url: String,
    pub cta_label: String,
    pub tagline: String,
}

impl EmailTemplate {
    pub fn article_url(&self, item: &ContentItem) -> String {
        format!("{}/blog/{}", self.site_url.trim_end_matches('/'), item.slug)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailContent {
    pub subject: String,
    pub preview_text: String,
    pub html: String,
}

pub fn render(item: &ContentItem, template: &EmailTemplate) -> EmailContent {
    let excerpt = excerpt(item);
    let byline = format!(
        "By {} • {}",
        item.author,
        item.published_at.format("%B %-d, %Y")
    );
    let article_url = template.article_url(item);

    let mut html = String::with_capacity(2048);
    html.push_str(
        r#"<div style="font-family: Georgia, serif; max-width: 600px; margin: 0 auto; color: #1f2933;">"#,
    );
    if let Some(cover) = item.cover_image_url.as_deref().filter(|url| !url.trim().is_empty()) {
        html.push_str(&format!(
            r#"<img src="{}" alt="{}" style="width: 100%; border-radius: 8px; margin-bottom: 24px;" />"#,
            escape_html(cover),
            escape_html(&item.title)
        ));
    }
    html.push_str(&format!(
        r#"<h1 style="font-size: 28px; line-height: 1.3; margin: 0 0 8px;">{}</h1>"#,
        escape_html(&item.title)
    ));
    html.push_str(&format!(
        r#"<p style="color: #6b7280; font-size: 14px; margin: 0 0 24px;">{}</p>"#,
        escape_html(&byline)
    ));
    html.push_str(&format!(
        r#"<p style="font-size: 17px; line-height: 1.6;">{}</p>"#,
        escape_html(&excerpt)
    ));
    html.push_str(&format!(
        r#"<p style="margin: 32px 0;"><a href="{}" style="background: #111827; color: #ffffff; padding: 12px 24px; border-radius: 6px; text-decoration: none;">{}</a></p>"#,
        escape_html(&article_url),
        escape_html(&template.cta_label)
    ));
    html.push_str(&format!(
        r#"<p style="color: #9ca3af; font-size: 13px; border-top: 1px solid #e5e7eb; padding-top: 16px;">{}</p>"#,
        escape_html(&template.tagline)
    ));
    html.push_str("</div>");

    EmailContent {
        subject: item.title.clone(),
        preview_text: excerpt,
        html,
    }
}

/// The explicit excerpt, or the opening of the body with markup removed.
pub fn excerpt(item: &ContentItem) -> String {
    if let Some(explicit) = item.excerpt.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
        return explicit.to_string();
    }
    let text = strip_tags(&item.body_html);
    truncate_chars(&text, EXCERPT_CHARS)
}

const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption", "figure",
    "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "ol", "p", "pre",
    "section", "table", "td", "th", "tr", "ul",
];

/// Visible text of an HTML fragment with entities decoded and whitespace collapsed.
/// Block elements start a new word; inline elements join their neighbours.
pub fn strip_tags(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut text = String::with_capacity(html.len());
    for node in fragment.root_element().descendants() {
        match node.value() {
            Node::Element(element) if BLOCK_ELEMENTS.contains(&element.name()) => text.push(' '),
            Node::Text(chunk) => {
                let hidden = node
                    .parent()
                    .and_then(|parent| parent.value().as_element())
                    .is_some_and(|parent| matches!(parent.name(), "script" | "style"));
                if !hidden {
                    text.push_str(chunk);
                }
            }
            _ => {}
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}...", cut.trim_end())
}

pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::types::slug::Slug;

    fn template() -> EmailTemplate {
        EmailTemplate {
            site_url: "https://example.com/".to_string(),
            cta_label: "Read the full article".to_string(),
            tagline: "Thanks for reading.".to_string(),
        }
    }

    fn item(excerpt: Option<&str>, body: &str, cover: Option<&str>) -> ContentItem {
        ContentItem {
            id: Uuid::nil(),
            slug: Slug::try_from("morning-routines").unwrap(),
            title: "Morning Routines & You".to_string(),
            author: "Sam Rivera".to_string(),
            published_at: Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap(),
            excerpt: excerpt.map(str::to_string),
            body_html: body.to_string(),
            cover_image_url: cover.map(str::to_string),
        }
    }

    #[test]
    fn renders_byline_link_and_tagline() {
        let content = render(&item(Some("Short intro."), "<p>body</p>", None), &template());
        assert_eq!(content.subject, "Morning Routines & You");
        assert!(content.html.contains("By Sam Rivera • March 5, 2024"));
        assert!(content.html.contains(r#"href="https://example.com/blog/morning-routines""#));
        assert!(content.html.contains("Morning Routines &amp; You"));
        assert!(content.html.contains("Thanks for reading."));
        assert!(!content.html.contains("<img"));
        assert_eq!(content.preview_text, "Short intro.");
    }

    #[test]
    fn includes_cover_when_present() {
        let content = render(
            &item(None, "<p>body</p>", Some("https://cdn.example.com/c.jpg")),
            &template(),
        );
        assert!(content.html.contains(r#"<img src="https://cdn.example.com/c.jpg""#));
    }

    #[test]
    fn excerpt_falls_back_to_stripped_body() {
        let body = format!("<h2>Intro</h2><p>{}</p>", "word ".repeat(100));
        let excerpt = excerpt(&item(None, &body, None));
        assert!(excerpt.starts_with("Intro word word"));
        assert!(excerpt.ends_with("..."));
        assert!(!excerpt.contains('<'));
        assert!(excerpt.chars().count() <= EXCERPT_CHARS + 3);
    }

    #[test]
    fn entities_are_decoded_once() {
        let body = "<p>Tom &amp; Jerry&nbsp;rock. It&#39;s <em>great</em>.</p>";
        let article = item(None, body, None);
        assert_eq!(excerpt(&article), "Tom & Jerry rock. It's great.");
        let content = render(&article, &template());
        assert!(content.html.contains("Tom &amp; Jerry rock. It&#39;s great."));
        assert!(!content.html.contains("&amp;amp;"));
    }

    #[test]
    fn script_and_style_text_is_dropped() {
        let body = "<style>p { color: red; }</style><p>Visible</p><script>track()</script>";
        assert_eq!(strip_tags(body), "Visible");
    }

    #[test]
    fn short_body_is_not_truncated() {
        assert_eq!(excerpt(&item(Some("   "), "<p>Just <b>this</b>.</p>", None)), "Just this.");
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = render(&item(None, "<p>same</p>", None), &template());
        let b = render(&item(None, "<p>same</p>", None), &template());
        assert_eq!(a, b);
    }
}
