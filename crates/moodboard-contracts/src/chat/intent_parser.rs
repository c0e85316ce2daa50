use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, BATCH_COMMAND, EDIT_COMMAND, NO_ARG_COMMANDS, RAW_ARG_COMMANDS,
    REASONING_COMMAND, SINGLE_PATH_COMMANDS,
};

/// One line typed into the chat loop. Plain text is a generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.command_args.insert(key.to_string(), value);
        self
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_single_path_arg(arg: &str) -> String {
    if arg.trim().is_empty() {
        return String::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        Err(_) => arg.trim().to_string(),
    }
}

fn parse_toggle(arg: &str) -> Value {
    match arg.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Value::Bool(true),
        "off" | "false" | "no" | "0" => Value::Bool(false),
        _ => Value::Null,
    }
}

/// `<x_top> <y_top> <x_bottom> <y_bottom> <request...>` or just `<request...>`.
///
/// The region is only taken when the first four words are all integers, so a
/// request that merely starts with a number stays intact. Four integers and
/// nothing else is a region with an empty request, which editing rejects.
fn parse_edit_args(arg: &str) -> (Value, String) {
    let words: Vec<&str> = arg.split_whitespace().collect();
    if words.len() >= 4 && words[..4].iter().all(|word| word.parse::<i64>().is_ok()) {
        let region = words[..4]
            .iter()
            .map(|word| Value::String((*word).to_string()))
            .collect();
        return (Value::Array(region), words[4..].join(" "));
    }
    (Value::Null, arg.trim().to_string())
}

fn parse_batch_args(arg: &str) -> (Value, String) {
    let trimmed = arg.trim();
    let (head, tail) = trimmed
        .split_once(char::is_whitespace)
        .unwrap_or((trimmed, ""));
    match head.parse::<u64>() {
        Ok(count) => (Value::Number(count.into()), tail.trim().to_string()),
        Err(_) => (Value::Null, trimmed.to_string()),
    }
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

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                return Intent::new(action, text).with_arg("model", Value::String(arg.to_string()));
            }

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                return Intent::new(action, text)
                    .with_arg("path", Value::String(parse_single_path_arg(arg)));
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            if command == EDIT_COMMAND.command {
                let (region, request) = parse_edit_args(arg);
                let mut intent = Intent::new(EDIT_COMMAND.action, text).with_arg("region", region);
                intent.prompt = Some(request).filter(|value| !value.is_empty());
                return intent;
            }

            if command == BATCH_COMMAND.command {
                let (count, prompt) = parse_batch_args(arg);
                let mut intent = Intent::new(BATCH_COMMAND.action, text).with_arg("count", count);
                intent.prompt = Some(prompt).filter(|value| !value.is_empty());
                return intent;
            }

            if command == REASONING_COMMAND.command {
                return Intent::new(REASONING_COMMAND.action, text)
                    .with_arg("enabled", parse_toggle(arg));
            }

            return Intent::new("unknown", text)
                .with_arg("command", Value::String(command))
                .with_arg("arg", Value::String(arg.to_string()));
        }
    }

    let mut intent = Intent::new("generate", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}
