//! Interactive setup: prompts for the configuration and prepares state.

use std::fmt::Display;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tracing::info;

use crate::api::Notifier;
use crate::db::{BaselineStore, Database};
use crate::models::StakeBaseline;
use crate::trading::{MirrorConfig, SizingMode, WatchedAccount};

/// Line-oriented prompter over any reader/writer pair.
struct Prompter<R, W> {
    input: R,
    out: W,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    fn new(input: R, out: W) -> Self {
        Self { input, out }
    }

    fn read_answer(&mut self, question: &str, default: Option<&str>) -> Result<String> {
        match default {
            Some(d) => write!(self.out, "{} [{}]: ", question, d)?,
            None => write!(self.out, "{}: ", question)?,
        }
        self.out.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            anyhow::bail!("input closed during setup");
        }
        Ok(line.trim().to_string())
    }

    /// Ask until a non-empty answer is given or the default is accepted.
    fn ask(&mut self, question: &str, default: Option<&str>) -> Result<String> {
        loop {
            let answer = self.read_answer(question, default)?;
            if !answer.is_empty() {
                return Ok(answer);
            }
            if let Some(d) = default {
                return Ok(d.to_string());
            }
        }
    }

    /// Empty answer means "not set".
    fn ask_optional(&mut self, question: &str) -> Result<Option<String>> {
        let answer = self.read_answer(question, None)?;
        Ok(Some(answer).filter(|a| !a.is_empty()))
    }

    fn ask_parsed<T>(&mut self, question: &str, default: Option<&str>) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        loop {
            let answer = self.ask(question, default)?;
            match answer.parse() {
                Ok(value) => return Ok(value),
                Err(e) => writeln!(self.out, "  invalid value: {}", e)?,
            }
        }
    }

    fn ask_sizing_mode(&mut self) -> Result<SizingMode> {
        loop {
            let answer = self.ask("Sizing mode (fixed/proportional)", Some("fixed"))?;
            match SizingMode::from_str(&answer) {
                Some(mode) => return Ok(mode),
                None => writeln!(self.out, "  expected `fixed` or `proportional`")?,
            }
        }
    }

    fn ask_account(&mut self, index: usize) -> Result<WatchedAccount> {
        loop {
            let answer = self.ask(&format!("Account {}", index), None)?;
            let mut parts = answer.split_whitespace();
            let Some(account) = parts.next() else {
                continue;
            };

            match parts.next().map(Decimal::from_str).transpose() {
                Ok(weight) => {
                    return Ok(WatchedAccount::new(account, weight.unwrap_or(Decimal::ONE)));
                }
                Err(e) => writeln!(self.out, "  invalid weight: {}", e)?,
            }
        }
    }
}

/// Collect a configuration interactively. The result is validated.
pub fn prompt_config<R: BufRead, W: Write>(input: R, out: W) -> Result<MirrorConfig> {
    let mut p = Prompter::new(input, out);

    let network = p.ask("Network", Some("finney"))?;
    let wallet = p.ask("Your wallet name", None)?;
    let fixed_amount: Decimal = p.ask_parsed("Fixed amount per trade", Some("0.1"))?;
    let sizing_mode = p.ask_sizing_mode()?;

    let count: usize = p.ask_parsed("How many accounts to mirror", None)?;
    writeln!(
        p.out,
        "Enter each account and an optional weight (default 1.0), e.g. `5Eabc123 0.6`"
    )?;
    let accounts = (1..=count)
        .map(|i| p.ask_account(i))
        .collect::<Result<Vec<_>>>()?;

    let poll_interval_secs: u64 = p.ask_parsed("Poll interval in seconds", Some("30"))?;
    let live_webhook = p.ask_optional("Webhook for live trade alerts (blank for none)")?;
    let summary_webhook = p.ask_optional("Webhook for summary reports (blank for none)")?;
    let low_balance: Decimal = p.ask_parsed("Pause below balance", Some("1.0"))?;
    let resume_balance: Decimal = p.ask_parsed("Resume at balance", Some("2.0"))?;
    let tool_path = p.ask("Path to stake tool", Some("btcli"))?;

    let config = MirrorConfig {
        network,
        sizing_mode,
        poll_interval_secs,
        live_webhook,
        summary_webhook,
        low_balance,
        resume_balance,
        tool_path: tool_path.into(),
        ..MirrorConfig::new(wallet, fixed_amount, accounts)
    };
    config.validate()?;

    Ok(config)
}

/// Run the setup wizard on the terminal and prepare state files.
pub async fn run_setup(config_path: &Path, state_path: &Path, database_url: &str) -> Result<()> {
    let config = {
        let stdin = io::stdin();
        prompt_config(stdin.lock(), io::stdout())?
    };

    config.save(config_path)?;
    println!("\nConfig saved to {}", config_path.display());

    let store = BaselineStore::new(state_path);
    if !state_path.exists() {
        store
            .save(&StakeBaseline::new())
            .context("Failed to create state file")?;
    }

    Database::new(database_url).await?;
    info!(config = %config_path.display(), state = %state_path.display(), "Setup complete");

    let notifier = Notifier::new(config.live_webhook.clone(), config.summary_webhook.clone())?;
    notifier
        .live_text(&format!(
            "✅ stakemirror setup complete for {} accounts on `{}`.",
            config.accounts.len(),
            config.network
        ))
        .await;
    notifier
        .summary_text("📊 stakemirror summary channel initialized.")
        .await;

    println!("Run `stakemirror run` to start mirroring.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Cursor;

    #[test]
    fn test_prompt_with_defaults() {
        let answers = "\nmirror\n\n\n2\n5Fhot\n5Gother 0.6\n\n\n\n\n\n\n";
        let mut out = Vec::new();

        let config = prompt_config(Cursor::new(answers), &mut out).unwrap();

        assert_eq!(config.network, "finney");
        assert_eq!(config.wallet, "mirror");
        assert_eq!(config.fixed_amount, dec!(0.1));
        assert_eq!(config.sizing_mode, SizingMode::Fixed);
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[0].weight, Decimal::ONE);
        assert_eq!(config.accounts[1].weight, dec!(0.6));
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.live_webhook, None);
        assert_eq!(config.tool_path, std::path::PathBuf::from("btcli"));
    }

    #[test]
    fn test_reprompts_invalid_answers() {
        let answers = "test\nmirror\nabc\n0.25\nweighted\none\n1\n5Fhot x\n5Fhot 2\n10\nhttps://hooks.example/live\n\n1\n3\n/usr/bin/btcli\n";
        let mut out = Vec::new();

        let config = prompt_config(Cursor::new(answers), &mut out).unwrap();

        assert_eq!(config.network, "test");
        assert_eq!(config.fixed_amount, dec!(0.25));
        assert_eq!(config.sizing_mode, SizingMode::Proportional);
        assert_eq!(config.accounts, vec![WatchedAccount::new("5Fhot", dec!(2))]);
        assert_eq!(config.live_webhook.as_deref(), Some("https://hooks.example/live"));
        assert_eq!(config.resume_balance, dec!(3));

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("invalid value"));
        assert!(printed.contains("invalid weight"));
    }

    #[test]
    fn test_closed_input_is_an_error() {
        let mut out = Vec::new();
        assert!(prompt_config(Cursor::new("finney\n"), &mut out).is_err());
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let answers = "\nmirror\n\n\n1\n5Fhot\n\n\n\n5\n2\n\n";
        let mut out = Vec::new();
        assert!(prompt_config(Cursor::new(answers), &mut out).is_err());
    }
}
