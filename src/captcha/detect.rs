//! Challenge detection over rendered page HTML.

use scraper::{Html, Selector};
use url::Url;

/// What was found on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// Interactive widget identified by its site key.
    Widget { site_key: String },
    /// Image challenge; `image_src` is absolute (or a `data:` URL).
    Image { image_src: String },
}

const WIDGET_SELECTOR: &str = "div.g-recaptcha[data-sitekey]";
const WIDGET_IFRAME_SELECTOR: &str = r#"iframe[src*="recaptcha"]"#;
const IMAGE_SELECTOR: &str = r#"img[src*="captcha"], img[id*="captcha"]"#;
pub(crate) const IMAGE_INPUT_SELECTOR: &str = r#"input[name*="captcha"], input[id*="captcha"]"#;

/// Scan `html` for a widget site key or an image challenge.
pub fn detect_in_html(html: &str, page_url: &str) -> Option<Detection> {
    let document = Html::parse_document(html);

    if let Some(site_key) = widget_site_key(&document) {
        return Some(Detection::Widget { site_key });
    }

    let image = select_first(&document, IMAGE_SELECTOR)?;
    select_first(&document, IMAGE_INPUT_SELECTOR)?;
    let src = image.value().attr("src")?.trim();
    if src.is_empty() {
        return None;
    }
    Some(Detection::Image {
        image_src: absolutize(src, page_url),
    })
}

fn widget_site_key(document: &Html) -> Option<String> {
    if let Some(div) = select_first(document, WIDGET_SELECTOR) {
        if let Some(key) = div.value().attr("data-sitekey") {
            if !key.trim().is_empty() {
                return Some(key.trim().to_string());
            }
        }
    }

    let selector = Selector::parse(WIDGET_IFRAME_SELECTOR).ok()?;
    document
        .select(&selector)
        .filter_map(|frame| frame.value().attr("src"))
        .find_map(site_key_from_src)
}

/// Pull the `k=` parameter out of a widget iframe URL.
fn site_key_from_src(src: &str) -> Option<String> {
    let src = if src.starts_with("//") {
        format!("https:{}", src)
    } else {
        src.to_string()
    };
    let url = Url::parse(&src).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == "k")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

fn select_first<'a>(document: &'a Html, selector: &str) -> Option<scraper::ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next()
}

fn absolutize(src: &str, page_url: &str) -> String {
    if src.starts_with("data:") {
        return src.to_string();
    }
    match Url::parse(page_url).and_then(|base| base.join(src)) {
        Ok(url) => url.to_string(),
        Err(_) => src.to_string(),
    }
}
