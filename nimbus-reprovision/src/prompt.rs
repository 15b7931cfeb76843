use crate::error::ReprovisionError;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Password, Select};
use std::collections::VecDeque;

pub type Validator<'a> = &'a dyn Fn(&str) -> Result<(), String>;

/// Operator interaction used by the workflow. Everything that needs a human goes through here.
pub trait Prompter: Send {
    /// Pick one of `items`. Returns the index.
    fn choose(&mut self, prompt: &str, items: &[String], default: Option<usize>) -> Result<usize, ReprovisionError>;

    /// Free text, re-asked until `validate` accepts it.
    fn input(&mut self, prompt: &str, default: Option<&str>, validate: Validator<'_>) -> Result<String, ReprovisionError>;

    fn password(&mut self, prompt: &str, confirm: bool) -> Result<String, ReprovisionError>;

    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, ReprovisionError>;
}

impl<P: Prompter + ?Sized> Prompter for Box<P> {
    fn choose(&mut self, prompt: &str, items: &[String], default: Option<usize>) -> Result<usize, ReprovisionError> {
        (**self).choose(prompt, items, default)
    }

    fn input(&mut self, prompt: &str, default: Option<&str>, validate: Validator<'_>) -> Result<String, ReprovisionError> {
        (**self).input(prompt, default, validate)
    }

    fn password(&mut self, prompt: &str, confirm: bool) -> Result<String, ReprovisionError> {
        (**self).password(prompt, confirm)
    }

    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, ReprovisionError> {
        (**self).confirm(prompt, default)
    }
}

pub fn non_empty(s: &str) -> Result<(), String> {
    if s.trim().is_empty() {
        Err("value cannot be empty".to_string())
    } else {
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Terminal
// -----------------------------------------------------------------------------

pub struct TerminalPrompter {
    theme: ColorfulTheme,
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompter for TerminalPrompter {
    fn choose(&mut self, prompt: &str, items: &[String], default: Option<usize>) -> Result<usize, ReprovisionError> {
        let idx = Select::with_theme(&self.theme)
            .with_prompt(prompt)
            .items(items)
            .default(default.unwrap_or(0))
            .interact()?;
        tracing::debug!("{} -> {}", prompt, items.get(idx).map(String::as_str).unwrap_or(""));
        Ok(idx)
    }

    fn input(&mut self, prompt: &str, default: Option<&str>, validate: Validator<'_>) -> Result<String, ReprovisionError> {
        let mut input = Input::<String>::with_theme(&self.theme).with_prompt(prompt);
        if let Some(d) = default {
            input = input.default(d.to_string());
        }
        let value = input
            .validate_with(|s: &String| validate(s.trim()))
            .interact_text()?;
        Ok(value.trim().to_string())
    }

    fn password(&mut self, prompt: &str, confirm: bool) -> Result<String, ReprovisionError> {
        let mut p = Password::with_theme(&self.theme).with_prompt(prompt);
        if confirm {
            p = p.with_confirmation("Confirm password", "Passwords do not match");
        }
        Ok(p.interact()?)
    }

    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, ReprovisionError> {
        Ok(Confirm::with_theme(&self.theme)
            .with_prompt(prompt)
            .default(default)
            .interact()?)
    }
}

// -----------------------------------------------------------------------------
// Non-interactive
// -----------------------------------------------------------------------------

/// Takes defaults where they exist and fails where a human decision is required.
pub struct NonInteractivePrompter;

impl Prompter for NonInteractivePrompter {
    fn choose(&mut self, prompt: &str, items: &[String], default: Option<usize>) -> Result<usize, ReprovisionError> {
        match default {
            Some(idx) if idx < items.len() => Ok(idx),
            _ => Err(ReprovisionError::InteractionRequired(prompt.to_string())),
        }
    }

    fn input(&mut self, prompt: &str, default: Option<&str>, validate: Validator<'_>) -> Result<String, ReprovisionError> {
        match default {
            Some(d) if validate(d).is_ok() => Ok(d.to_string()),
            _ => Err(ReprovisionError::InteractionRequired(prompt.to_string())),
        }
    }

    fn password(&mut self, prompt: &str, _confirm: bool) -> Result<String, ReprovisionError> {
        Err(ReprovisionError::InteractionRequired(prompt.to_string()))
    }

    fn confirm(&mut self, _prompt: &str, default: bool) -> Result<bool, ReprovisionError> {
        Ok(default)
    }
}

// -----------------------------------------------------------------------------
// Scripted (tests, automation)
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    /// Pick by index.
    Index(usize),
    /// Pick the first item containing this text.
    Pick(String),
    Text(String),
    Secret(String),
    Yes,
    No,
}

impl Answer {
    pub fn pick(label: &str) -> Self {
        Answer::Pick(label.to_string())
    }
}

/// Replays a fixed list of answers and records every prompt it was shown.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<Answer>,
    pub prompts: Vec<String>,
    pub menus: Vec<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            prompts: vec![],
            menus: vec![],
        }
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }

    fn next(&mut self, prompt: &str) -> Result<Answer, ReprovisionError> {
        self.prompts.push(prompt.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| ReprovisionError::InteractionRequired(format!("no scripted answer for '{}'", prompt)))
    }
}

impl Prompter for ScriptedPrompter {
    fn choose(&mut self, prompt: &str, items: &[String], _default: Option<usize>) -> Result<usize, ReprovisionError> {
        self.menus.push(items.to_vec());
        let unexpected = |a: &Answer| ReprovisionError::InteractionRequired(format!("'{}' cannot answer menu '{}'", format!("{a:?}"), prompt));
        match self.next(prompt)? {
            Answer::Index(i) if i < items.len() => Ok(i),
            Answer::Pick(label) => items
                .iter()
                .position(|item| item.contains(&label))
                .ok_or_else(|| ReprovisionError::InteractionRequired(format!("no item '{}' in menu '{}'", label, prompt))),
            other => Err(unexpected(&other)),
        }
    }

    fn input(&mut self, prompt: &str, _default: Option<&str>, validate: Validator<'_>) -> Result<String, ReprovisionError> {
        match self.next(prompt)? {
            Answer::Text(t) => {
                validate(&t).map_err(|e| ReprovisionError::InteractionRequired(format!("{}: {}", prompt, e)))?;
                Ok(t)
            }
            other => Err(ReprovisionError::InteractionRequired(format!("{other:?} is not text for '{}'", prompt))),
        }
    }

    fn password(&mut self, prompt: &str, _confirm: bool) -> Result<String, ReprovisionError> {
        match self.next(prompt)? {
            Answer::Secret(s) | Answer::Text(s) => Ok(s),
            other => Err(ReprovisionError::InteractionRequired(format!("{other:?} is not a password for '{}'", prompt))),
        }
    }

    fn confirm(&mut self, prompt: &str, _default: bool) -> Result<bool, ReprovisionError> {
        match self.next(prompt)? {
            Answer::Yes => Ok(true),
            Answer::No => Ok(false),
            other => Err(ReprovisionError::InteractionRequired(format!("{other:?} is not yes/no for '{}'", prompt))),
        }
    }
}
