use std::collections::BTreeMap;

use serde::Serialize;

pub const ALL_CATEGORIES: &str = "All";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PromptTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub category: &'static str,
    pub template: &'static str,
    pub description: &'static str,
}

impl PromptTemplate {
    /// `{placeholder}` names in order of first appearance.
    pub fn placeholders(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Vec::new();
        let mut rest = self.template;
        while let Some(start) = rest.find('{') {
            let after = &rest[start + 1..];
            let Some(end) = after.find('}') else {
                break;
            };
            let name = &after[..end];
            if !names.contains(&name) {
                names.push(name);
            }
            rest = &after[end + 1..];
        }
        names
    }
}

pub const PROMPT_TEMPLATES: &[PromptTemplate] = &[
    PromptTemplate {
        id: "fantasy-landscape",
        name: "Fantasy Landscape",
        category: "Fantasy",
        template: "A {adjective} {landscape_type} with {magical_elements}, {art_style}, {quality_modifiers}, {lighting}",
        description: "Creates mystical and magical landscapes",
    },
    PromptTemplate {
        id: "portrait-character",
        name: "Character Portrait",
        category: "Portrait",
        template: "Portrait of a {character_type} {character_details}, {art_style}, {quality_modifiers}, {lighting}",
        description: "Generates detailed character portraits",
    },
    PromptTemplate {
        id: "cyberpunk-scene",
        name: "Cyberpunk Scene",
        category: "Sci-Fi",
        template: "Cyberpunk {scene_type} with {tech_elements}, neon lights, {weather}, {art_style}, {quality_modifiers}",
        description: "Creates futuristic cyberpunk environments",
    },
    PromptTemplate {
        id: "abstract-concept",
        name: "Abstract Concept",
        category: "Abstract",
        template: "Abstract representation of {concept} using {colors} and {shapes}, {art_style}, {quality_modifiers}",
        description: "Visualizes abstract concepts and emotions",
    },
    PromptTemplate {
        id: "nature-scene",
        name: "Nature Scene",
        category: "Nature",
        template: "Beautiful {nature_element} in {environment}, {time_of_day}, {art_style}, {quality_modifiers}, {lighting}",
        description: "Creates stunning natural environments",
    },
];

pub fn find_template(id: &str) -> Option<&'static PromptTemplate> {
    PROMPT_TEMPLATES.iter().find(|template| template.id == id)
}

/// `All` followed by each distinct category in table order.
pub fn template_categories() -> Vec<&'static str> {
    let mut categories = vec![ALL_CATEGORIES];
    for template in PROMPT_TEMPLATES {
        if !categories.contains(&template.category) {
            categories.push(template.category);
        }
    }
    categories
}

pub fn search_templates(term: &str, category: &str) -> Vec<&'static PromptTemplate> {
    let needle = term.trim().to_lowercase();
    PROMPT_TEMPLATES
        .iter()
        .filter(|template| {
            template.name.to_lowercase().contains(&needle)
                || template.description.to_lowercase().contains(&needle)
        })
        .filter(|template| category == ALL_CATEGORIES || template.category == category)
        .collect()
}

/// Substitutes known placeholders; unknown ones stay in place for the user to edit.
pub fn fill_template(template: &PromptTemplate, values: &BTreeMap<String, String>) -> String {
    let mut filled = template.template.to_string();
    for (name, value) in values {
        filled = filled.replace(&format!("{{{name}}}"), value);
    }
    filled
}
