//! Command-line actions exposed to the user.

use clap::Subcommand;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
  /// Download a subject's flashcards and tests for offline use
  Prepare { subject: i64 },
  /// Show a subject's flashcards, from the network or offline copy
  Cards { subject: i64 },
  /// Show a subject's tests, from the network or offline copy
  Tests { subject: i64 },
  /// Record a finished test; delivered now or on the next drain
  Record {
    #[arg(long)]
    test_id: i64,
    /// Percentage score
    #[arg(long)]
    score: u32,
    /// Answer as QUESTION_ID=ANSWER, repeatable
    #[arg(long = "answer", value_parser = parse_answer)]
    answers: Vec<(i64, String)>,
  },
  /// List results recorded on this device and their sync state
  Results,
  /// Show offline storage statistics
  Stats,
  /// Delete all offline data
  Clear {
    /// Skip the confirmation
    #[arg(long)]
    yes: bool,
  },
  /// Deliver pending results now
  Drain,
  /// Issue a request through the interceptor
  Fetch {
    url: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Check for a newer version
  Update,
  /// Add a launcher entry for the application
  Install,
  /// Monitor connectivity and sync whenever it is restored
  Watch,
}

/// Parse `QUESTION_ID=ANSWER`.
pub fn parse_answer(input: &str) -> Result<(i64, String), String> {
  let (id, answer) = input
    .split_once('=')
    .ok_or_else(|| format!("expected QUESTION_ID=ANSWER, got '{}'", input))?;
  let id = id
    .trim()
    .parse::<i64>()
    .map_err(|_| format!("invalid question id '{}'", id))?;
  Ok((id, answer.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_answer() {
    assert_eq!(parse_answer("3=b").unwrap(), (3, "b".to_string()));
    assert_eq!(parse_answer("4=a=b").unwrap(), (4, "a=b".to_string()));
    assert!(parse_answer("nope").is_err());
    assert!(parse_answer("x=1").is_err());
  }
}
