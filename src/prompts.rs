use crate::models::{Choice, CustomizationRequest};

/// Used as the whole customization section when no override is selected.
pub const FOLLOW_ORIGINAL: &str = "Follow original design";

const ANALYSIS_RUBRIC: &str = "Analyze this web design template image in extreme detail:

1. LAYOUT STRUCTURE: sections, grid, hierarchy
2. COLOR SCHEME: backgrounds, text, buttons, accents (hex codes)
3. TYPOGRAPHY: heading styles, body text, font weights
4. UI ELEMENTS: buttons, forms, images, icons, navigation
5. SPACING: padding, margins, alignment
6. SPECIAL EFFECTS: shadows, borders, gradients";

const REQUIREMENTS: &str = "REQUIREMENTS:
1. Complete HTML5 document with DOCTYPE
2. Semantic HTML5 tags (header, nav, main, section, footer)
3. Modern CSS (Flexbox/Grid for layout)
4. Fully responsive (mobile-friendly with media queries)
5. Include ALL elements: text, buttons, forms, images (use https://placehold.co/800x400 for images)
6. Match colors exactly (use hex codes)
7. Add hover effects and transitions
8. Include viewport meta tag
9. Embed all CSS in <style> tag
10. Add helpful comments";

const OUTPUT_CONTRACT: &str = "OUTPUT: Provide ONLY complete HTML code. Start with <!DOCTYPE html> and end with </html>. No explanations.";

/// Stage one: the fixed rubric, plus the user's focus text verbatim when there is any.
pub fn build_analysis_prompt(focus: Option<&str>) -> String {
    match focus.filter(|f| !f.is_empty()) {
        Some(focus) => format!("{ANALYSIS_RUBRIC}\n\nADDITIONAL FOCUS:\n{focus}"),
        None => ANALYSIS_RUBRIC.to_string(),
    }
}

/// One instruction per selected override, always in the order
/// color, font size, spacing, buttons, animations, free text.
pub fn customization_lines(custom: &CustomizationRequest) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(v) = custom.color_scheme.and_then(Choice::prompt_value) {
        lines.push(format!("Use a {v} color scheme"));
    }
    if let Some(v) = custom.font_size.and_then(Choice::prompt_value) {
        lines.push(format!("Use {v} font sizes"));
    }
    if let Some(v) = custom.spacing.and_then(Choice::prompt_value) {
        lines.push(format!("Use {v} spacing"));
    }
    if let Some(v) = custom.button_style.and_then(Choice::prompt_value) {
        lines.push(format!("Style buttons as {v}"));
    }
    if custom.animations {
        lines.push("Add smooth CSS animations and transitions".to_string());
    }
    if let Some(text) = custom.focus() {
        lines.push(text.to_string());
    }
    lines
}

/// Body of the CUSTOMIZATIONS section, without its leading bullet.
pub fn customization_section(custom: &CustomizationRequest) -> String {
    let lines = customization_lines(custom);
    if lines.is_empty() { FOLLOW_ORIGINAL.to_string() } else { lines.join("\n- ") }
}

/// Stage two: analysis, overrides, the ten requirements and the HTML-only reply contract.
pub fn build_synthesis_prompt(analysis: &str, custom: &CustomizationRequest) -> String {
    let customizations = customization_section(custom);
    format!(
        "Generate complete HTML and CSS code based on this analysis:\n\n\
         ANALYSIS:\n{analysis}\n\n\
         CUSTOMIZATIONS:\n- {customizations}\n\n\
         {REQUIREMENTS}\n\n\
         {OUTPUT_CONTRACT}"
    )
}
