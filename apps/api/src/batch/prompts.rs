// Prompt template for batch content generation.
// Placeholders are filled by `build_prompt`; nothing else may assemble generator prompts.

use crate::models::content::{ContentSpec, ContentType};
use crate::styles::catalog::Style;

/// Replace `{content_kind}`, `{headline}`, `{details}`, `{style_name}`,
/// `{palette}` and `{composition_notes}` before sending.
pub const CONTENT_PROMPT_TEMPLATE: &str = "\
Create a {content_kind} for an independent auto-repair shop.

Headline: \"{headline}\"
{details}
Visual style: {style_name}
Color palette: {palette}
Composition: {composition_notes}

Render the headline text exactly as written. Keep the lower-right corner free of \
important detail; the shop logo is placed there afterwards. No watermarks, no \
invented brand names, no phone numbers or prices that are not in the copy above.";

const FLYER_KIND: &str = "promotional flyer (portrait, print-ready, bold readable typography)";
const MEME_KIND: &str = "social media meme (square, one punchline, casual and funny)";

pub fn build_prompt(content: &ContentSpec, style: &Style) -> String {
    let kind = match content.content_type {
        ContentType::Flyer => FLYER_KIND,
        ContentType::Meme => MEME_KIND,
    };
    let details = content
        .details
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| format!("Supporting copy: \"{d}\"\n"))
        .unwrap_or_default();
    let palette = if style.palette.is_empty() {
        "designer's choice".to_string()
    } else {
        style.palette.join(", ")
    };

    CONTENT_PROMPT_TEMPLATE
        .replace("{content_kind}", kind)
        .replace("{headline}", content.headline.trim())
        .replace("{details}", &details)
        .replace("{style_name}", &style.name)
        .replace("{palette}", &palette)
        .replace("{composition_notes}", &style.composition_notes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::styles::catalog::StyleCatalog;

    fn content(details: Option<&str>) -> ContentSpec {
        ContentSpec {
            content_type: ContentType::Flyer,
            headline: "  Spring brake check  ".to_string(),
            details: details.map(str::to_string),
            logo_key: None,
            anchor: None,
        }
    }

    #[test]
    fn test_prompt_fills_every_placeholder() {
        let catalog = StyleCatalog::builtin().unwrap();
        let style = &catalog.styles()[0];
        let prompt = build_prompt(&content(Some("Free inspection")), style);

        assert!(!prompt.contains('{'), "unfilled placeholder in: {prompt}");
        assert!(prompt.contains("\"Spring brake check\""));
        assert!(prompt.contains("Free inspection"));
        assert!(prompt.contains(&style.name));
        assert!(prompt.contains("promotional flyer"));
    }

    #[test]
    fn test_blank_details_are_omitted() {
        let catalog = StyleCatalog::builtin().unwrap();
        let prompt = build_prompt(&content(Some("   ")), &catalog.styles()[0]);
        assert!(!prompt.contains("Supporting copy"));
    }
}
