//! Prompt engineering helpers: keyword tables, enhancement, scoring and
//! autocomplete for the prompt field.

mod templates;

use serde::Serialize;

pub use templates::{
    fill_template, find_template, search_templates, template_categories, PromptTemplate,
    ALL_CATEGORIES, PROMPT_TEMPLATES,
};

pub const ART_STYLES: &[(&str, &[&str])] = &[
    (
        "digital",
        &["digital art", "concept art", "digital painting", "matte painting"],
    ),
    (
        "traditional",
        &["oil painting", "watercolor", "acrylic painting", "pencil drawing"],
    ),
    (
        "photography",
        &[
            "photorealistic",
            "cinematic",
            "portrait photography",
            "macro photography",
        ],
    ),
    (
        "fantasy",
        &["fantasy art", "magical realism", "mythological", "ethereal"],
    ),
    (
        "scifi",
        &["cyberpunk", "futuristic", "sci-fi concept art", "space art"],
    ),
    (
        "abstract",
        &["abstract art", "surreal", "psychedelic", "geometric abstract"],
    ),
];

pub const QUALITY_MODIFIERS: &[&str] = &[
    "high quality",
    "detailed",
    "masterpiece",
    "award winning",
    "8k resolution",
    "ultra detailed",
    "professional",
    "stunning",
];

pub const LIGHTING_TERMS: &[&str] = &[
    "dramatic lighting",
    "soft lighting",
    "golden hour",
    "volumetric lighting",
    "rim lighting",
    "ambient lighting",
    "cinematic lighting",
    "natural lighting",
];

pub const COMPOSITION_TERMS: &[&str] = &[
    "rule of thirds",
    "dynamic composition",
    "centered composition",
    "wide angle",
    "close-up",
    "bird's eye view",
    "low angle",
];

const SUBJECTS: &[&str] = &[
    "portrait",
    "landscape",
    "abstract",
    "character",
    "animal",
    "building",
    "vehicle",
];

const BUILDER_SUBJECTS: &[&str] = &[
    "character",
    "landscape",
    "cityscape",
    "animal",
    "vehicle",
    "building",
];

const BUILDER_SECTION_SIZE: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptEnhancement {
    pub original: String,
    pub enhanced: String,
    pub improvements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptValidation {
    pub is_valid: bool,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StrengthLevel {
    Weak,
    Fair,
    Good,
    Strong,
    Excellent,
}

impl StrengthLevel {
    fn from_score(score: u32) -> Self {
        match score {
            s if s > 80 => Self::Excellent,
            s if s > 60 => Self::Strong,
            s if s > 40 => Self::Good,
            s if s > 20 => Self::Fair,
            _ => Self::Weak,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Weak => "Weak",
            Self::Fair => "Fair",
            Self::Good => "Good",
            Self::Strong => "Strong",
            Self::Excellent => "Excellent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PromptStrength {
    pub score: u32,
    pub level: StrengthLevel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderSection {
    pub name: &'static str,
    pub terms: Vec<&'static str>,
}

pub fn art_style_terms() -> impl Iterator<Item = &'static str> {
    ART_STYLES.iter().flat_map(|(_, styles)| styles.iter().copied())
}

fn mentions_any<'a>(lower: &str, mut terms: impl Iterator<Item = &'a str>) -> bool {
    terms.any(|term| lower.contains(&term.to_lowercase()))
}

pub fn enhance_prompt(original: &str) -> PromptEnhancement {
    let mut enhanced = original.trim().to_string();
    let mut improvements = Vec::new();

    if !mentions_any(&enhanced.to_lowercase(), QUALITY_MODIFIERS.iter().copied()) {
        enhanced.push_str(", high quality, detailed");
        improvements.push("Added quality modifiers".to_string());
    }

    if !mentions_any(&enhanced.to_lowercase(), art_style_terms()) {
        enhanced.push_str(", digital art");
        improvements.push("Added art style specification".to_string());
    }

    let has_lighting = mentions_any(&enhanced.to_lowercase(), LIGHTING_TERMS.iter().copied());
    if !has_lighting && enhanced.chars().count() < 100 {
        enhanced.push_str(", dramatic lighting");
        improvements.push("Added lighting description".to_string());
    }

    PromptEnhancement {
        original: original.to_string(),
        enhanced: tidy_commas(&enhanced),
        improvements,
    }
}

/// Collapses `,,` / `, ,` runs and drops a trailing comma.
fn tidy_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        out.push(ch);
        if ch != ',' {
            continue;
        }
        loop {
            let mut lookahead = chars.clone();
            while lookahead.peek().is_some_and(|c| c.is_whitespace()) {
                lookahead.next();
            }
            if lookahead.peek() == Some(&',') {
                lookahead.next();
                chars = lookahead;
            } else {
                break;
            }
        }
    }

    let trimmed_len = out.trim_end().len();
    if out[..trimmed_len].ends_with(',') {
        out.truncate(trimmed_len - 1);
    }
    out
}

/// Up to three themed rewrites of `base`.
pub fn prompt_suggestions(base: &str) -> Vec<String> {
    let lower = base.to_lowercase();
    let mut suffixes: Vec<&str> = Vec::new();

    if lower.contains("landscape") || lower.contains("nature") {
        suffixes.extend([
            "photorealistic, golden hour lighting, cinematic",
            "fantasy art, magical atmosphere, ethereal",
            "oil painting style, impressionist, masterpiece",
        ]);
    }
    if lower.contains("portrait") || lower.contains("character") {
        suffixes.extend([
            "professional portrait photography, studio lighting",
            "fantasy character art, detailed, dramatic lighting",
            "digital painting, concept art, high quality",
        ]);
    }
    if lower.contains("city") || lower.contains("urban") {
        suffixes.extend([
            "cyberpunk aesthetic, neon lights, futuristic",
            "architectural photography, golden hour, cinematic",
            "concept art, matte painting, detailed",
        ]);
    }
    if suffixes.is_empty() {
        suffixes.extend([
            "digital art, high quality, detailed",
            "concept art, cinematic lighting, masterpiece",
            "photorealistic, 8k resolution, professional",
        ]);
    }

    suffixes
        .into_iter()
        .take(3)
        .map(|suffix| format!("{base}, {suffix}"))
        .collect()
}

pub fn extract_keywords(prompt: &str) -> Vec<String> {
    let lower = prompt.to_lowercase();
    let mut keywords: Vec<String> = ART_STYLES
        .iter()
        .filter(|(_, styles)| mentions_any(&lower, styles.iter().copied()))
        .map(|(category, _)| category.to_string())
        .collect();
    keywords.extend(
        SUBJECTS
            .iter()
            .filter(|subject| lower.contains(*subject))
            .map(|subject| subject.to_string()),
    );
    keywords
}

pub fn validate_prompt(prompt: &str) -> PromptValidation {
    let length = prompt.chars().count();
    let mut suggestions = Vec::new();

    if length < 10 {
        suggestions.push("Add more descriptive details to your prompt".to_string());
    }
    if !prompt.contains(',') && length > 20 {
        suggestions.push(
            "Consider adding style modifiers (e.g., \"digital art, high quality\")".to_string(),
        );
    }
    if !mentions_any(&prompt.to_lowercase(), QUALITY_MODIFIERS.iter().copied()) {
        suggestions.push("Add quality modifiers like \"high quality\" or \"detailed\"".to_string());
    }

    PromptValidation {
        is_valid: suggestions.is_empty(),
        suggestions,
    }
}

pub fn prompt_strength(prompt: &str) -> PromptStrength {
    let lower = prompt.to_lowercase();
    let mut score = match prompt.chars().count() {
        n if n > 150 => 30,
        n if n > 100 => 25,
        n if n > 50 => 20,
        n if n > 20 => 10,
        n if n > 5 => 5,
        _ => 0,
    };

    if mentions_any(&lower, QUALITY_MODIFIERS.iter().copied()) {
        score += 20;
    }
    if mentions_any(&lower, art_style_terms()) {
        score += 20;
    }
    if mentions_any(&lower, LIGHTING_TERMS.iter().copied()) {
        score += 15;
    }
    if mentions_any(&lower, COMPOSITION_TERMS.iter().copied()) {
        score += 15;
    }

    let score = score.min(100);
    PromptStrength {
        score,
        level: StrengthLevel::from_score(score),
    }
}

fn all_keywords() -> impl Iterator<Item = &'static str> {
    art_style_terms()
        .chain(QUALITY_MODIFIERS.iter().copied())
        .chain(LIGHTING_TERMS.iter().copied())
        .chain(COMPOSITION_TERMS.iter().copied())
}

/// Keywords completing the last word of `prompt`, at most five.
pub fn autocomplete(prompt: &str) -> Vec<&'static str> {
    let last_word = prompt
        .split_whitespace()
        .last()
        .map(str::to_lowercase)
        .unwrap_or_default();
    // A trailing space means the user finished the word.
    if prompt.ends_with(char::is_whitespace) || last_word.chars().count() < 2 {
        return Vec::new();
    }

    all_keywords()
        .filter(|keyword| {
            let lower = keyword.to_lowercase();
            lower.starts_with(&last_word) && lower != last_word
        })
        .take(5)
        .collect()
}

pub fn builder_sections() -> Vec<BuilderSection> {
    vec![
        BuilderSection {
            name: "Subject",
            terms: BUILDER_SUBJECTS.to_vec(),
        },
        BuilderSection {
            name: "Style",
            terms: art_style_terms().take(BUILDER_SECTION_SIZE).collect(),
        },
        BuilderSection {
            name: "Quality",
            terms: QUALITY_MODIFIERS.iter().copied().take(BUILDER_SECTION_SIZE).collect(),
        },
        BuilderSection {
            name: "Lighting",
            terms: LIGHTING_TERMS.iter().copied().take(BUILDER_SECTION_SIZE).collect(),
        },
        BuilderSection {
            name: "Composition",
            terms: COMPOSITION_TERMS
                .iter()
                .copied()
                .take(BUILDER_SECTION_SIZE)
                .collect(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enhance_adds_missing_modifiers() {
        let result = enhance_prompt("  a cat on a roof ");
        assert_eq!(
            result.enhanced,
            "a cat on a roof, high quality, detailed, digital art, dramatic lighting"
        );
        assert_eq!(result.original, "  a cat on a roof ");
        assert_eq!(result.improvements.len(), 3);
    }

    #[test]
    fn enhance_keeps_complete_prompts() {
        let prompt = "castle, oil painting, masterpiece, golden hour";
        let result = enhance_prompt(prompt);
        assert_eq!(result.enhanced, prompt);
        assert!(result.improvements.is_empty());
    }

    #[test]
    fn enhance_tidies_commas() {
        let result = enhance_prompt("castle, , masterpiece, oil painting, soft lighting,");
        assert_eq!(result.enhanced, "castle, masterpiece, oil painting, soft lighting");
    }

    #[test]
    fn enhance_skips_lighting_for_long_prompts() {
        let long = "a ".repeat(60);
        let result = enhance_prompt(&long);
        assert!(!result.enhanced.ends_with("dramatic lighting"));
        assert_eq!(result.improvements.len(), 2);
    }

    #[test]
    fn suggestions_follow_theme() {
        let suggestions = prompt_suggestions("misty landscape portrait");
        assert_eq!(suggestions.len(), 3);
        assert!(suggestions[0].ends_with("photorealistic, golden hour lighting, cinematic"));

        let generic = prompt_suggestions("a teapot");
        assert_eq!(generic[0], "a teapot, digital art, high quality, detailed");
    }

    #[test]
    fn keywords_list_styles_then_subjects() {
        assert_eq!(
            extract_keywords("Cyberpunk portrait, watercolor"),
            vec!["traditional", "scifi", "portrait"]
        );
    }

    #[test]
    fn validation_flags_short_plain_prompts() {
        let short = validate_prompt("cat");
        assert!(!short.is_valid);
        assert_eq!(short.suggestions.len(), 2);

        let run_on = validate_prompt("a very long prompt with no separators at all");
        assert_eq!(run_on.suggestions.len(), 2);

        assert!(validate_prompt("a cat, high quality").is_valid);
    }

    #[test]
    fn strength_scores_and_levels() {
        assert_eq!(prompt_strength("cat").level, StrengthLevel::Weak);

        let fair = prompt_strength("a cat, high quality");
        assert_eq!(fair.score, 25);
        assert_eq!(fair.level, StrengthLevel::Fair);

        let excellent = prompt_strength(
            "a cat sitting on a windowsill at dusk, digital art, high quality, \
             dramatic lighting, rule of thirds, long quiet evening",
        );
        assert_eq!(excellent.score, 95);
        assert_eq!(excellent.level, StrengthLevel::Excellent);
    }

    #[test]
    fn autocomplete_matches_last_word_prefix() {
        assert_eq!(autocomplete("a city, cyber"), vec!["cyberpunk"]);
        assert_eq!(
            autocomplete("portrait, DRAM"),
            vec!["dramatic lighting"]
        );
        assert!(autocomplete("a c").is_empty());
        assert!(autocomplete("a cyberpunk").is_empty());
        assert_eq!(autocomplete("so").len(), 1);
    }

    #[test]
    fn builder_has_five_sections_of_six() {
        let sections = builder_sections();
        let names: Vec<&str> = sections.iter().map(|section| section.name).collect();
        assert_eq!(
            names,
            vec!["Subject", "Style", "Quality", "Lighting", "Composition"]
        );
        assert!(sections.iter().all(|section| section.terms.len() == 6));
        assert_eq!(sections[1].terms[4], "oil painting");
    }
}
