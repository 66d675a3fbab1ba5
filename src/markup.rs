//! `<picture>` markup from a variant record.
//!
//! HTML handling is deliberately shallow: locate one `<img>` tag, read its
//! `src`, and check or rewrite a handful of sizing attributes. Everything
//! else in the tag passes through untouched.
//!
//! ## Output
//!
//! ```html
//! <picture class="responsive-image">
//!   <source type="image/avif" sizes="…" srcset="…992w, …768w, …">
//!   <source type="image/webp" sizes="…" srcset="…">
//!   <source type="image/jpeg" sizes="…" srcset="…">
//!   <img src="…photo_992.jpg?version=…" width="992" height="595" loading="lazy" decoding="async" …>
//! </picture>
//! ```
//!
//! Every `srcset` lists only the requested breakpoints, widest first. A
//! format whose filtered srcset is empty gets no `<source>` at all.

use crate::cache::{SrcSet, VariantRecord};
use crate::imaging::calculations::scaled_height;
use crate::types::Format;
use maud::{PreEscaped, html};
use regex::{Captures, Regex};
use std::sync::LazyLock;

static IMG_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<img\b[^>]*>").unwrap());

/// One attribute: name, then an optional quoted or bare value. Quoted
/// values are consumed whole, so words inside them are never names.
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\s([^\s"'<>/=]+)(?:\s*=\s*("[^"]*"|'[^']*'|[^\s>"']+))?"#).unwrap()
});

/// Class on the generated `<picture>`.
pub const PICTURE_CLASS: &str = "responsive-image";

/// The first `<img …>` tag in a fragment.
pub fn find_img_tag(fragment: &str) -> Option<&str> {
    IMG_TAG.find(fragment).map(|m| m.as_str())
}

/// Attributes after the `<img` of a tag.
fn attributes(tag: &str) -> impl Iterator<Item = Captures<'_>> {
    let start = if tag.get(..4).is_some_and(|o| o.eq_ignore_ascii_case("<img")) {
        4
    } else {
        0
    };
    ATTRIBUTE.captures_iter(&tag[start..])
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .into_iter()
        .find_map(|q| value.strip_prefix(q).and_then(|v| v.strip_suffix(q)))
        .unwrap_or(value)
}

/// Value of the tag's `src` attribute.
pub fn extract_src(tag: &str) -> Option<&str> {
    attributes(tag)
        .find(|caps| caps[1].eq_ignore_ascii_case("src"))
        .and_then(|caps| caps.get(2))
        .map(|m| unquote(m.as_str()))
}

/// Which of `width`, `height`, `loading`, `decoding` the tag already has.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SizingAttributes {
    pub width: bool,
    pub height: bool,
    pub loading: bool,
    pub decoding: bool,
}

impl SizingAttributes {
    fn mark(&mut self, name: &str) {
        match name.to_ascii_lowercase().as_str() {
            "width" => self.width = true,
            "height" => self.height = true,
            "loading" => self.loading = true,
            "decoding" => self.decoding = true,
            _ => {}
        }
    }
}

pub fn sizing_attributes(tag: &str) -> SizingAttributes {
    let mut found = SizingAttributes::default();
    for caps in attributes(tag) {
        found.mark(&caps[1]);
    }
    found
}

/// `srcset` attribute value for the requested breakpoints, widest first.
pub fn srcset_attribute(srcset: &SrcSet, breakpoints: &[u32]) -> String {
    srcset
        .iter()
        .rev()
        .filter(|(width, _)| breakpoints.contains(width))
        .map(|(width, url)| format!("{url} {width}w"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rewrite the original tag into the fallback `<img>`.
///
/// `src`, `width` and `height` are pointed at the given variant. Sizing
/// attributes the tag lacks are added right after `<img`.
pub fn fallback_img(tag: &str, src: &str, width: u32, height: u32) -> String {
    let Some(open) = tag.get(..4).filter(|o| o.eq_ignore_ascii_case("<img")) else {
        return tag.to_string();
    };
    let rest = &tag[4..];
    let mut present = SizingAttributes::default();
    let mut body = String::with_capacity(rest.len() + 64);
    let mut last = 0;

    for caps in ATTRIBUTE.captures_iter(rest) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        present.mark(name.as_str());
        let value = match name.as_str().to_ascii_lowercase().as_str() {
            "src" => src.to_string(),
            "width" => width.to_string(),
            "height" => height.to_string(),
            _ => continue,
        };
        body.push_str(&rest[last..whole.start()]);
        body.push_str(&format!(" {}=\"{value}\"", name.as_str()));
        last = whole.end();
    }
    body.push_str(&rest[last..]);

    let mut injected = String::new();
    if !present.width {
        injected.push_str(&format!(" width=\"{width}\""));
    }
    if !present.height {
        injected.push_str(&format!(" height=\"{height}\""));
    }
    if !present.loading {
        injected.push_str(" loading=\"lazy\"");
    }
    if !present.decoding {
        injected.push_str(" decoding=\"async\"");
    }
    format!("{open}{injected}{body}")
}

/// Build the `<picture>` replacement for `tag`.
///
/// Returns `None` when the record has nothing to offer for the requested
/// breakpoints; the caller keeps the original tag.
pub fn render_picture(tag: &str, record: &VariantRecord, breakpoints: &[u32]) -> Option<String> {
    let base_srcset = srcset_attribute(&record.base.srcset, breakpoints);
    if base_srcset.is_empty() {
        return None;
    }
    let (&fallback_width, fallback_src) = record.base.srcset.last_key_value()?;
    let fallback_height = scaled_height((record.base.width, record.base.height), fallback_width);
    let fallback = fallback_img(tag, fallback_src, fallback_width, fallback_height);

    let sizes = record.base.sizes.join(", ");
    let mut sources: Vec<(&'static str, String)> = [Format::Avif, Format::Webp]
        .into_iter()
        .filter(|&f| f != record.base.format)
        .filter_map(|f| {
            let srcset = srcset_attribute(record.srcset(f)?, breakpoints);
            (!srcset.is_empty()).then_some((f.mime(), srcset))
        })
        .collect();
    sources.push((record.base.format.mime(), base_srcset));

    let markup = html! {
        picture class=(PICTURE_CLASS) {
            @for (mime, srcset) in &sources {
                source type=(mime) sizes=(sizes) srcset=(srcset);
            }
            (PreEscaped(fallback))
        }
    };
    Some(markup.into_string())
}

/// Replace the first `<img>` of `fragment` with `replacement`.
pub fn replace_img_tag(fragment: &str, replacement: &str) -> String {
    match IMG_TAG.find(fragment) {
        Some(m) => format!(
            "{}{}{}",
            &fragment[..m.start()],
            replacement,
            &fragment[m.end()..]
        ),
        None => fragment.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BaseVariants;

    fn record() -> VariantRecord {
        let url = |w: u32, ext: &str| format!("/c/photo_{w}.{ext}?version=h");
        let widths = [200, 320, 480, 768, 992];
        let mut record = VariantRecord::new(BaseVariants {
            width: 1000,
            height: 600,
            format: Format::Jpeg,
            version: "h".into(),
            sizes: vec!["(max-width: 1200px) 100vw".into(), "1200px".into()],
            srcset: widths.iter().map(|&w| (w, url(w, "jpg"))).collect(),
        });
        record.set_format(
            Format::Webp,
            widths.iter().map(|&w| (w, url(w, "webp"))).collect(),
        );
        record
    }

    const TAG: &str = r#"<img src="/images/photo.jpg" alt="A photo">"#;
    const ALL: &[u32] = &[200, 320, 480, 768, 992, 1200];

    // =========================================================================
    // Extraction
    // =========================================================================

    #[test]
    fn finds_img_in_fragment() {
        let fragment = r#"<figure><IMG SRC="/a.jpg"><figcaption>x</figcaption></figure>"#;
        assert_eq!(find_img_tag(fragment), Some(r#"<IMG SRC="/a.jpg">"#));
        assert_eq!(find_img_tag("<p>no image</p>"), None);
        assert_eq!(find_img_tag("<imgx src=\"a\">"), None);
    }

    #[test]
    fn extracts_src() {
        assert_eq!(extract_src(TAG), Some("/images/photo.jpg"));
        assert_eq!(extract_src("<img src = 'a b.png'>"), Some("a b.png"));
        assert_eq!(extract_src(r#"<img data-src="/lazy.jpg">"#), None);
        assert_eq!(extract_src("<img alt=\"x\">"), None);
    }

    #[test]
    fn detects_sizing_attributes() {
        let found = sizing_attributes(r#"<img src="a" width="10" loading="eager">"#);
        assert_eq!(
            found,
            SizingAttributes {
                width: true,
                height: false,
                loading: true,
                decoding: false,
            }
        );
        // data-width is not width
        assert!(!sizing_attributes(r#"<img data-width="3">"#).width);
    }

    // =========================================================================
    // srcset / fallback
    // =========================================================================

    #[test]
    fn srcset_is_filtered_and_descending() {
        let r = record();
        assert_eq!(
            srcset_attribute(&r.base.srcset, &[200, 768, 1200]),
            "/c/photo_768.jpg?version=h 768w, /c/photo_200.jpg?version=h 200w"
        );
        assert_eq!(srcset_attribute(&r.base.srcset, &[]), "");
    }

    #[test]
    fn fallback_injects_missing_attributes() {
        let img = fallback_img(TAG, "/c/photo_992.jpg?version=h", 992, 595);
        assert_eq!(
            img,
            r#"<img width="992" height="595" loading="lazy" decoding="async" src="/c/photo_992.jpg?version=h" alt="A photo">"#
        );
    }

    #[test]
    fn fallback_rewrites_existing_dimensions_and_keeps_loading() {
        let tag = r#"<img src="/p.jpg" width="300" height=200 loading="eager" decoding="sync">"#;
        let img = fallback_img(tag, "/c/p_992.jpg", 992, 595);
        assert_eq!(
            img,
            r#"<img src="/c/p_992.jpg" width="992" height="595" loading="eager" decoding="sync">"#
        );
    }

    #[test]
    fn attribute_words_inside_values_do_not_count() {
        let tag = r#"<img src="/p.jpg" alt="Truck loading dock, width 3m">"#;
        assert_eq!(sizing_attributes(tag), SizingAttributes::default());

        let img = fallback_img(tag, "/c/p_992.jpg", 992, 595);
        assert_eq!(
            img,
            r#"<img width="992" height="595" loading="lazy" decoding="async" src="/c/p_992.jpg" alt="Truck loading dock, width 3m">"#
        );
    }

    #[test]
    fn attribute_lookalikes_inside_values_are_not_rewritten() {
        let tag = r#"<img title='see src="x" width=4' src="/p.jpg">"#;
        assert_eq!(extract_src(tag), Some("/p.jpg"));
        let img = fallback_img(tag, "/c/p_200.jpg", 200, 120);
        assert!(img.contains(r#"title='see src="x" width=4'"#));
        assert!(img.contains(r#" src="/c/p_200.jpg""#));
        assert!(img.contains(r#" width="200""#));
    }

    #[test]
    fn bare_and_unquoted_attributes_are_recognized() {
        let tag = "<img src=/p.jpg loading decoding=async>";
        assert_eq!(extract_src(tag), Some("/p.jpg"));
        let found = sizing_attributes(tag);
        assert!(found.loading && found.decoding);
        assert!(!found.width && !found.height);
    }

    // =========================================================================
    // render_picture
    // =========================================================================

    #[test]
    fn picture_orders_sources_and_uses_largest_breakpoint() {
        let html = render_picture(TAG, &record(), ALL).unwrap();
        assert!(html.starts_with(r#"<picture class="responsive-image"><source type="image/webp""#));
        let webp = html.find("image/webp").unwrap();
        let jpeg = html.find("image/jpeg").unwrap();
        let img = html.find("<img").unwrap();
        assert!(webp < jpeg && jpeg < img);
        assert!(html.contains(r#"src="/c/photo_992.jpg?version=h""#));
        assert!(html.contains(r#"width="992" height="595""#));
        assert!(html.contains(r#"sizes="(max-width: 1200px) 100vw, 1200px""#));
        assert!(html.ends_with("</picture>"));
    }

    #[test]
    fn picture_includes_avif_first() {
        let mut r = record();
        r.set_format(
            Format::Avif,
            SrcSet::from([(480, "/c/photo_480.avif?version=h".to_string())]),
        );
        let html = render_picture(TAG, &r, ALL).unwrap();
        let avif = html.find("image/avif").unwrap();
        assert!(avif < html.find("image/webp").unwrap());
        assert!(html.contains(r#"srcset="/c/photo_480.avif?version=h 480w""#));
    }

    #[test]
    fn picture_omits_source_with_empty_filtered_srcset() {
        let mut r = record();
        r.set_format(
            Format::Avif,
            SrcSet::from([(992, "/c/photo_992.avif?version=h".to_string())]),
        );
        let html = render_picture(TAG, &r, &[200, 320]).unwrap();
        assert!(!html.contains("image/avif"));
        assert!(html.contains("image/webp"));
    }

    #[test]
    fn picture_without_webp_has_no_webp_source() {
        let mut r = record();
        r.webp = None;
        let html = render_picture(TAG, &r, ALL).unwrap();
        assert!(!html.contains("image/webp"));
        assert_eq!(html.matches("<source").count(), 1);
    }

    #[test]
    fn nothing_to_render_returns_none() {
        let mut r = record();
        assert!(render_picture(TAG, &r, &[]).is_none());
        assert!(render_picture(TAG, &r, &[1600]).is_none());
        r.base.srcset.clear();
        r.webp = None;
        assert!(render_picture(TAG, &r, ALL).is_none());
    }

    #[test]
    fn replace_keeps_surrounding_markup() {
        let fragment = r#"<p><img src="/a.jpg"> caption</p>"#;
        assert_eq!(
            replace_img_tag(fragment, "<picture></picture>"),
            "<p><picture></picture> caption</p>"
        );
    }
}
