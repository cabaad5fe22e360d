use std::collections::BTreeMap;
use std::io::{BufRead, ErrorKind, Write};

use anyhow::Result;
use ethereal_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use ethereal_contracts::gallery::GeneratedImage;
use ethereal_contracts::prompts::{
    autocomplete, enhance_prompt, fill_template, find_template, prompt_strength,
    prompt_suggestions, search_templates, template_categories, validate_prompt, ALL_CATEGORIES,
};
use ethereal_engine::wallet::MintResult;
use ethereal_engine::{Studio, StudioGeneration};
use serde_json::Value;

const PROMPT_PREVIEW_CHARS: usize = 60;

/// Line-oriented studio session; plain text generates, `/commands` do the rest.
pub fn run_chat<R: BufRead, W: Write>(studio: &mut Studio, mut input: R, out: &mut W) -> Result<()> {
    writeln!(out, "Ethereal Canvas chat started. Type /help for commands.")?;
    let mut line = String::new();
    loop {
        write!(out, "> ")?;
        out.flush()?;

        line.clear();
        let read = match input.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        if intent.action == "noop" {
            continue;
        }
        if let Err(err) = handle_intent(studio, &intent, &mut input, out) {
            tracing::debug!(action = %intent.action, error = %format!("{err:#}"), "chat command failed");
            writeln!(out, "Error: {err:#}")?;
        }
    }
    Ok(())
}

fn handle_intent<R: BufRead, W: Write>(
    studio: &mut Studio,
    intent: &Intent,
    input: &mut R,
    out: &mut W,
) -> Result<()> {
    match intent.action.as_str() {
        "help" => {
            writeln!(out, "Commands: {}", CHAT_HELP_COMMANDS.join(" "))?;
        }
        "generate" => {
            let prompt = intent.prompt.as_deref().unwrap_or_default();
            let generation = studio.generate(prompt)?;
            write_generation(out, &generation)?;
        }
        "history" => {
            let history = studio.prompts().history()?;
            write_list(out, &history, "No prompt history yet.")?;
        }
        "favorites" => {
            let favorites = studio.prompts().favorites()?;
            write_list(out, &favorites, "No favorite prompts yet.")?;
        }
        "toggle_favorite" => {
            let Some(prompt) = required_prompt(intent) else {
                writeln!(out, "/favorite requires a prompt")?;
                return Ok(());
            };
            if studio.prompts().toggle_favorite(prompt)? {
                writeln!(out, "Added to favorites: {prompt}")?;
            } else {
                writeln!(out, "Removed from favorites: {prompt}")?;
            }
        }
        "clear_history" => {
            studio.prompts().clear_history()?;
            writeln!(out, "Prompt history cleared.")?;
        }
        "gallery" => {
            let images = studio.images()?;
            write_images(out, &images, "Gallery is empty.")?;
        }
        "nfts" => {
            let images = studio.gallery().nfts()?;
            write_images(out, &images, "No NFTs minted yet.")?;
        }
        "show_image" => {
            let Some(id) = required_id(intent) else {
                writeln!(out, "/show requires an image id")?;
                return Ok(());
            };
            let image = studio.image(id)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&image)?)?;
        }
        "delete_images" => {
            let ids = intent.arg_list("ids");
            if ids.is_empty() {
                writeln!(out, "/delete requires one or more image ids")?;
                return Ok(());
            }
            let removed = studio.delete(&ids)?;
            writeln!(out, "Deleted {removed} of {} image(s).", ids.len())?;
        }
        "mint" => {
            let Some(id) = required_id(intent) else {
                writeln!(out, "/mint requires an image id")?;
                return Ok(());
            };
            let mut confirm = |current: u64, target: u64| {
                confirm_switch(input, out, current, target)
            };
            let result = studio.mint(id, Some(&mut confirm))?;
            write_mint(out, &result)?;
        }
        "connect_wallet" => match studio.connect_wallet() {
            Ok(state) => writeln!(
                out,
                "Connected {} on chain {} (balance {} ETH)",
                state.address.as_deref().unwrap_or("?"),
                state
                    .chain_id
                    .map(|chain| chain.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                state.balance
            )?,
            Err(err) => writeln!(out, "{err}")?,
        },
        "disconnect_wallet" => {
            studio.disconnect_wallet();
            writeln!(out, "Wallet disconnected.")?;
        }
        "wallet_status" => {
            writeln!(out, "{}", serde_json::to_string_pretty(studio.wallet().state())?)?;
        }
        "set_advance_mode" => {
            let requested = intent
                .settings_update
                .get("advance_mode")
                .and_then(Value::as_bool);
            let enabled = studio.set_advance_mode(requested);
            writeln!(out, "Advance mode {}", if enabled { "on" } else { "off" })?;
        }
        "enhance" => {
            let Some(prompt) = required_prompt(intent) else {
                writeln!(out, "/enhance requires a prompt")?;
                return Ok(());
            };
            let enhancement = enhance_prompt(prompt);
            writeln!(out, "Enhanced: {}", enhancement.enhanced)?;
            for improvement in &enhancement.improvements {
                writeln!(out, "  + {improvement}")?;
            }
        }
        "suggest" => {
            let Some(prompt) = required_prompt(intent) else {
                writeln!(out, "/suggest requires a prompt")?;
                return Ok(());
            };
            for (index, suggestion) in prompt_suggestions(prompt).iter().enumerate() {
                writeln!(out, "{}. {suggestion}", index + 1)?;
            }
        }
        "strength" => {
            let Some(prompt) = required_prompt(intent) else {
                writeln!(out, "/strength requires a prompt")?;
                return Ok(());
            };
            let strength = prompt_strength(prompt);
            writeln!(out, "Strength: {}/100 ({})", strength.score, strength.level.label())?;
            for tip in validate_prompt(prompt).suggestions {
                writeln!(out, "  - {tip}")?;
            }
            let completions = autocomplete(prompt);
            if !completions.is_empty() {
                writeln!(out, "Completions: {}", completions.join(", "))?;
            }
        }
        "list_templates" => {
            let term = intent.arg_str("term").unwrap_or_default();
            let category = intent.arg_str("category").unwrap_or(ALL_CATEGORIES);
            let matches = search_templates(term, category);
            if matches.is_empty() {
                writeln!(out, "No templates match.")?;
            }
            for template in matches {
                writeln!(
                    out,
                    "{} [{}] {}: {}",
                    template.id, template.category, template.name, template.description
                )?;
            }
            writeln!(out, "Categories: {}", template_categories().join(", "))?;
        }
        "use_template" => {
            let Some(id) = required_id(intent) else {
                writeln!(out, "/template requires a template id")?;
                return Ok(());
            };
            let Some(template) = find_template(id) else {
                writeln!(out, "Unknown template: {id}")?;
                return Ok(());
            };
            writeln!(out, "{}: {}", template.name, template.template)?;
            let mut values = BTreeMap::new();
            for name in template.placeholders() {
                let Some(value) = ask(input, out, &format!("{name}: "))? else {
                    return Ok(());
                };
                if !value.is_empty() {
                    values.insert(name.to_string(), value);
                }
            }
            let prompt = fill_template(template, &values);
            writeln!(out, "Prompt: {prompt}")?;
            let generation = studio.generate(&prompt)?;
            write_generation(out, &generation)?;
        }
        "export" => {
            let Some(id) = required_id(intent) else {
                writeln!(out, "/export requires an image id")?;
                return Ok(());
            };
            let path = studio.export(id)?;
            writeln!(out, "Exported to {}", path.display())?;
        }
        "diagnose" => {
            let report = studio.storage_report()?;
            writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
            let loads = studio.test_images()?;
            writeln!(
                out,
                "Results: {} successful, {} failed",
                loads.successful, loads.failed
            )?;
        }
        "unknown" => {
            let command = intent.arg_str("command").unwrap_or_default();
            writeln!(out, "Unknown command: /{command} (try /help)")?;
        }
        other => {
            writeln!(out, "Unhandled action: {other}")?;
        }
    }
    Ok(())
}

pub(crate) fn write_generation<W: Write>(out: &mut W, generation: &StudioGeneration) -> Result<()> {
    let failed = generation
        .outcome
        .attempts
        .iter()
        .filter(|attempt| !attempt.succeeded())
        .count();
    writeln!(
        out,
        "Saved image {} via {} ({} fallback attempt(s))",
        generation.image.id, generation.outcome.source, failed
    )?;
    writeln!(out, "{}", preview_url(&generation.image.image_url))?;
    Ok(())
}

pub(crate) fn write_images<W: Write>(out: &mut W, images: &[GeneratedImage], empty: &str) -> Result<()> {
    if images.is_empty() {
        writeln!(out, "{empty}")?;
        return Ok(());
    }
    for image in images {
        let marker = if image.is_nft {
            format!("NFT #{}", image.token_id.as_deref().unwrap_or("?"))
        } else {
            "-".to_string()
        };
        let prompt: String = image.prompt.chars().take(PROMPT_PREVIEW_CHARS).collect();
        writeln!(out, "{}  {marker}  {prompt}", image.id)?;
    }
    Ok(())
}

pub(crate) fn write_mint<W: Write>(out: &mut W, result: &MintResult) -> Result<()> {
    if result.is_pending() {
        writeln!(
            out,
            "Mint sent, not yet confirmed: tx {} ({})",
            result.transaction_hash, result.explorer_url
        )?;
        return Ok(());
    }
    let label = if result.is_simulated() {
        "Demo mint"
    } else {
        "Minted"
    };
    writeln!(
        out,
        "{label}: token {} tx {} ({})",
        result.token_id.as_deref().unwrap_or("?"),
        result.transaction_hash,
        result.explorer_url
    )?;
    Ok(())
}

fn write_list<W: Write>(out: &mut W, items: &[String], empty: &str) -> Result<()> {
    if items.is_empty() {
        writeln!(out, "{empty}")?;
    }
    for (index, item) in items.iter().enumerate() {
        writeln!(out, "{}. {item}", index + 1)?;
    }
    Ok(())
}

/// Data URIs are shortened to their header.
fn preview_url(url: &str) -> String {
    match url.split_once(',') {
        Some((header, payload)) if url.starts_with("data:") => {
            format!("{header},… ({} bytes base64)", payload.len())
        }
        _ => url.to_string(),
    }
}

fn required_prompt(intent: &Intent) -> Option<&str> {
    intent
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|prompt| !prompt.is_empty())
}

fn required_id(intent: &Intent) -> Option<&str> {
    intent.arg_str("id").filter(|id| !id.is_empty())
}

fn ask<R: BufRead, W: Write>(input: &mut R, out: &mut W, question: &str) -> Result<Option<String>> {
    write!(out, "{question}")?;
    out.flush()?;
    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        return Ok(None);
    }
    Ok(Some(answer.trim().to_string()))
}

fn confirm_switch<R: BufRead, W: Write>(input: &mut R, out: &mut W, current: u64, target: u64) -> bool {
    let question = format!("Network {current} has no mint contract. Switch to chain {target}? [y/N] ");
    match ask(input, out, &question) {
        Ok(Some(answer)) => matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"),
        _ => false,
    }
}
