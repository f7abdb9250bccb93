//! Serde-deserializable types matching the remote API responses.
//!
//! Kept apart from the store records so the wire format can change without
//! touching what is persisted.

use serde::Deserialize;

use crate::store::{Flashcard, Question, Test};

/// A list endpoint answers either with a bare array or a paginated envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiList<T> {
  Plain(Vec<T>),
  Paged { results: Vec<T> },
}

impl<T> ApiList<T> {
  pub fn into_vec(self) -> Vec<T> {
    match self {
      ApiList::Plain(items) => items,
      ApiList::Paged { results } => results,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiFlashcard {
  pub id: i64,
  #[serde(alias = "subject", alias = "subjectId")]
  pub subject_id: i64,
  #[serde(alias = "question")]
  pub front: String,
  #[serde(alias = "answer")]
  pub back: String,
}

impl From<ApiFlashcard> for Flashcard {
  fn from(card: ApiFlashcard) -> Self {
    Flashcard {
      id: card.id,
      subject_id: card.subject_id,
      front: card.front,
      back: card.back,
      last_sync: None,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiQuestion {
  pub id: i64,
  #[serde(alias = "text")]
  pub prompt: String,
  #[serde(default)]
  pub choices: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiTest {
  pub id: i64,
  #[serde(alias = "subject", alias = "subjectId")]
  pub subject_id: i64,
  pub title: String,
  #[serde(default)]
  pub questions: Vec<ApiQuestion>,
}

impl From<ApiTest> for Test {
  fn from(test: ApiTest) -> Self {
    Test {
      id: test.id,
      subject_id: test.subject_id,
      title: test.title,
      questions: test
        .questions
        .into_iter()
        .map(|q| Question {
          id: q.id,
          prompt: q.prompt,
          choices: q.choices,
        })
        .collect(),
      last_sync: None,
    }
  }
}

/// Body of the version endpoint.
#[derive(Debug, Deserialize)]
pub struct ApiVersion {
  pub version: String,
}
