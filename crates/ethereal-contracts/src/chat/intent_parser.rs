use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, ADVANCE_COMMAND, MULTI_ID_COMMANDS, NO_ARG_COMMANDS, PROMPT_ARG_COMMANDS,
    SINGLE_ID_COMMANDS, TEMPLATES_COMMAND,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub settings_update: BTreeMap<String, Value>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            settings_update: BTreeMap::new(),
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args.get(key).and_then(Value::as_str)
    }

    pub fn arg_list(&self, key: &str) -> Vec<String> {
        self.command_args
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_arg(arg: &str) -> String {
    let parts = split_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

fn parse_toggle(arg: &str) -> Option<bool> {
    match arg.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Some(true),
        "off" | "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Splits `/templates` arguments into a search term and a `category=` filter.
fn parse_template_query(arg: &str) -> (String, Option<String>) {
    let mut category: Option<String> = None;
    let mut terms: Vec<String> = Vec::new();
    for part in split_args(arg) {
        if let Some(value) = part.strip_prefix("category=") {
            category = Some(value.to_string());
        } else {
            terms.push(part);
        }
    }
    (terms.join(" "), category)
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, PROMPT_ARG_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.prompt = Some(arg.to_string());
                return intent;
            }

            if let Some(action) = find_action(&command, SINGLE_ID_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent
                    .command_args
                    .insert("id".to_string(), Value::String(parse_single_arg(arg)));
                return intent;
            }

            if let Some(action) = find_action(&command, MULTI_ID_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "ids".to_string(),
                    Value::Array(split_args(arg).into_iter().map(Value::String).collect()),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            if command == TEMPLATES_COMMAND.command {
                let (term, category) = parse_template_query(arg);
                let mut intent = Intent::new(TEMPLATES_COMMAND.action, text);
                intent
                    .command_args
                    .insert("term".to_string(), Value::String(term));
                intent.command_args.insert(
                    "category".to_string(),
                    category.map(Value::String).unwrap_or(Value::Null),
                );
                return intent;
            }

            if command == ADVANCE_COMMAND.command {
                let mut intent = Intent::new(ADVANCE_COMMAND.action, text);
                // No argument flips the current setting.
                intent.settings_update.insert(
                    "advance_mode".to_string(),
                    parse_toggle(arg).map(Value::Bool).unwrap_or(Value::Null),
                );
                return intent;
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("generate", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn plain_text_generates() {
        let intent = parse_intent("  a lighthouse at dusk ");
        assert_eq!(intent.action, "generate");
        assert_eq!(intent.prompt.as_deref(), Some("a lighthouse at dusk"));
    }

    #[test]
    fn blank_input_is_noop() {
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn prompt_commands_keep_the_whole_remainder() {
        let favorite = parse_intent("/favorite  neon city, \"rainy\" night ");
        assert_eq!(favorite.action, "toggle_favorite");
        assert_eq!(
            favorite.prompt.as_deref(),
            Some("neon city, \"rainy\" night")
        );

        assert_eq!(parse_intent("/enhance cat").action, "enhance");
        assert_eq!(parse_intent("/suggest cat").action, "suggest");
        assert_eq!(parse_intent("/STRENGTH cat").action, "strength");
    }

    #[test]
    fn id_commands() {
        let mint = parse_intent("/mint 1700000000000");
        assert_eq!(mint.action, "mint");
        assert_eq!(mint.arg_str("id"), Some("1700000000000"));

        let show = parse_intent("/show \"17 00\"");
        assert_eq!(show.arg_str("id"), Some("17 00"));

        let template = parse_intent("/template nature-scene");
        assert_eq!(template.action, "use_template");
        assert_eq!(template.arg_str("id"), Some("nature-scene"));
    }

    #[test]
    fn delete_accepts_many_ids() {
        let intent = parse_intent("/delete 1 2 3");
        assert_eq!(intent.action, "delete_images");
        assert_eq!(intent.command_args["ids"], json!(["1", "2", "3"]));
        assert_eq!(intent.arg_list("ids"), vec!["1", "2", "3"]);
    }

    #[test]
    fn no_arg_commands() {
        assert_eq!(parse_intent("/gallery").action, "gallery");
        assert_eq!(parse_intent("/nfts").action, "nfts");
        assert_eq!(parse_intent("/connect").action, "connect_wallet");
        assert_eq!(parse_intent("/disconnect").action, "disconnect_wallet");
        assert_eq!(parse_intent("/clear_history").action, "clear_history");
    }

    #[test]
    fn templates_query_and_category() {
        let intent = parse_intent("/templates creates category=Nature");
        assert_eq!(intent.action, "list_templates");
        assert_eq!(intent.command_args["term"], json!("creates"));
        assert_eq!(intent.command_args["category"], json!("Nature"));

        let bare = parse_intent("/templates");
        assert_eq!(bare.command_args["term"], json!(""));
        assert_eq!(bare.command_args["category"], json!(null));
    }

    #[test]
    fn advance_toggle_values() {
        assert_eq!(
            parse_intent("/advance on").settings_update["advance_mode"],
            json!(true)
        );
        assert_eq!(
            parse_intent("/advance off").settings_update["advance_mode"],
            json!(false)
        );
        assert_eq!(
            parse_intent("/advance").settings_update["advance_mode"],
            json!(null)
        );
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }
}
