//! Documentation page discovery and text extraction.

use std::time::Duration;

use regex::Regex;

use crate::core::config::IngestConfig;

use super::content_hash;

#[derive(Debug, Clone)]
pub struct PageContent {
    pub title: String,
    pub section: String,
    pub text: String,
    pub content_hash: String,
}

pub struct PageFetcher {
    client: reqwest::Client,
    base_url: Option<String>,
    fallback_urls: Vec<String>,
    min_content_chars: usize,
}

impl PageFetcher {
    pub fn new(config: &IngestConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config
                .base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            fallback_urls: config.fallback_urls.clone(),
            min_content_chars: config.min_content_chars,
        }
    }

    /// Discovers documentation URLs from the site's sitemap; falls back to
    /// the configured URL list when the sitemap is unreachable or empty.
    pub async fn discover_urls(&self) -> Vec<String> {
        let Some(base_url) = self.base_url.as_deref() else {
            return self.fallback_urls.clone();
        };

        let sitemap_url = format!("{}/sitemap.xml", base_url);
        match self.fetch_text(&sitemap_url).await {
            Ok(xml) => {
                let urls = extract_doc_urls(&xml, base_url);
                if urls.is_empty() {
                    tracing::warn!(stage = "discovery", "sitemap had no doc URLs, using fallback");
                    self.fallback_urls.clone()
                } else {
                    urls
                }
            }
            Err(err) => {
                tracing::warn!(stage = "discovery", error = %err, "sitemap fetch failed, using fallback");
                self.fallback_urls.clone()
            }
        }
    }

    /// Fetches one page and extracts clean text plus metadata.
    pub async fn fetch_page(&self, url: &str) -> anyhow::Result<PageContent> {
        let html = self.fetch_text(url).await?;

        let title = extract_title(&html).unwrap_or_else(|| section_from_url(url));
        let section = section_from_url(url);
        let text = normalize_whitespace(&strip_html_tags(&html));

        if text.chars().count() < self.min_content_chars {
            anyhow::bail!(
                "insufficient content extracted from {} ({} chars)",
                url,
                text.chars().count()
            );
        }

        let content_hash = content_hash(&text);
        Ok(PageContent {
            title,
            section,
            text,
            content_hash,
        })
    }

    async fn fetch_text(&self, url: &str) -> anyhow::Result<String> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("GET {} returned {}", url, response.status());
        }
        Ok(response.text().await?)
    }
}

/// Pulls `/docs/**` URLs out of sitemap XML, rewriting hosts to the
/// configured base and excluding search/tag/blog paths. Order-preserving
/// dedup.
fn extract_doc_urls(xml: &str, base_url: &str) -> Vec<String> {
    let loc_re = match Regex::new(r"<loc>\s*([^<]+?)\s*</loc>") {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };

    let mut seen = Vec::new();
    for capture in loc_re.captures_iter(xml) {
        let url = capture[1].trim();
        let Some(path_start) = url.find("/docs/") else {
            continue;
        };
        let path = &url[path_start..];
        if ["/search", "/tags/", "/blog/"]
            .iter()
            .any(|exclude| path.contains(exclude))
        {
            continue;
        }
        let rewritten = format!("{}{}", base_url, path);
        if !seen.contains(&rewritten) {
            seen.push(rewritten);
        }
    }
    seen
}

/// First meaningful path segment after `/docs/`, used as the section label.
pub fn section_from_url(url: &str) -> String {
    let path = url
        .find("/docs/")
        .map(|start| &url[start + "/docs/".len()..])
        .unwrap_or("");

    path.split('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("general")
        .to_string()
}

fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_lowercase();
    let start = lower.find("<title")?;
    let open_end = html[start..].find('>')? + start + 1;
    let close = lower[open_end..].find("</title>")? + open_end;

    let raw = html[open_end..close].trim();
    if raw.is_empty() {
        return None;
    }
    // Docusaurus titles carry a "| Site Name" suffix.
    Some(raw.split('|').next().unwrap_or(raw).trim().to_string())
}

/// Drops tags plus script/style bodies, keeping visible text.
fn strip_html_tags(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    let mut in_script = false;
    let mut in_style = false;

    let html_lower = html.to_lowercase();
    let chars: Vec<char> = html.chars().collect();
    let chars_lower: Vec<char> = html_lower.chars().collect();

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];

        if i + 7 < chars.len() {
            let tag: String = chars_lower[i..i + 7].iter().collect();
            if tag == "<script" {
                in_script = true;
            } else if i + 6 < chars.len()
                && chars_lower[i..i + 6].iter().collect::<String>() == "<style"
            {
                in_style = true;
            }
        }

        if in_script && i + 9 <= chars.len() {
            let tag: String = chars_lower[i..i + 9].iter().collect();
            if tag == "</script>" {
                in_script = false;
                i += 9;
                continue;
            }
        }
        if in_style && i + 8 <= chars.len() {
            let tag: String = chars_lower[i..i + 8].iter().collect();
            if tag == "</style>" {
                in_style = false;
                i += 8;
                continue;
            }
        }

        if in_script || in_style {
            i += 1;
            continue;
        }

        if c == '<' {
            in_tag = true;
        } else if c == '>' {
            in_tag = false;
            result.push(' ');
        } else if !in_tag {
            result.push(c);
        }

        i += 1;
    }

    result
}

fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sitemap_urls_are_filtered_rewritten_and_deduped() {
        let xml = r#"
            <urlset>
              <url><loc>https://old-host.example/docs/module1/chapter1</loc></url>
              <url><loc>https://old-host.example/docs/module1/chapter1</loc></url>
              <url><loc>https://old-host.example/docs/tags/ros2</loc></url>
              <url><loc>https://old-host.example/blog/post</loc></url>
              <url><loc>https://old-host.example/docs/module2/chapter4</loc></url>
            </urlset>
        "#;

        let urls = extract_doc_urls(xml, "https://book.example");
        assert_eq!(
            urls,
            vec![
                "https://book.example/docs/module1/chapter1".to_string(),
                "https://book.example/docs/module2/chapter4".to_string(),
            ]
        );
    }

    #[test]
    fn section_comes_from_first_docs_segment() {
        assert_eq!(
            section_from_url("https://x/docs/module1-ros2-fundamentals/chapter1"),
            "module1-ros2-fundamentals"
        );
        assert_eq!(section_from_url("https://x/docs/introduction/"), "introduction");
        assert_eq!(section_from_url("https://x/about"), "general");
    }

    #[test]
    fn html_stripping_keeps_text_drops_scripts() {
        let html = r#"
            <html>
            <head><title>Chapter 1 | Robotics Book</title><script>var x = 1;</script></head>
            <body><h1>Hello</h1><p>World</p><style>.a{color:red}</style></body>
            </html>
        "#;

        let text = normalize_whitespace(&strip_html_tags(html));
        assert!(text.contains("Hello"));
        assert!(text.contains("World"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("color:red"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn title_extraction_trims_site_suffix() {
        let html = "<html><head><title>Chapter 1 | Robotics Book</title></head></html>";
        assert_eq!(extract_title(html).as_deref(), Some("Chapter 1"));
        assert!(extract_title("<html></html>").is_none());
    }

    #[test]
    fn whitespace_is_normalized() {
        assert_eq!(normalize_whitespace("  a \n\n  b\tc  "), "a b c");
    }
}
