//! Bundled X-Ray builder.
//!
//! Reads character and term entries off the remote book page with configurable
//! CSS selectors, finds where each name occurs in the book text, and writes the
//! result as a JSON artifact.

use super::{IndexBuilder, artifact_file_name};
use crate::asin::Asin;
use crate::config::XRayConfig;
use crate::mobi::MobiBook;
use crate::remote::Connections;
use anyhow::Context;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Bytes of context kept on each side of an excerpt.
const EXCERPT_RADIUS: usize = 60;

/// Whether an entry describes a character or a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermKind {
    Character,
    Topic,
}

/// A character or topic read from the remote book page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub kind: TermKind,
    pub name: String,
    pub description: String,
}

/// All terms read from the remote book page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookTerms {
    pub terms: Vec<Term>,
}

/// Where a term occurs in the book text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermMentions {
    #[serde(flatten)]
    pub term: Term,
    /// Byte offsets into the decompressed text.
    pub locations: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// Terms cross-referenced with the book text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookMentions {
    pub text_length: usize,
    pub terms: Vec<TermMentions>,
}

/// On-disk layout of the artifact.
#[derive(Debug, Serialize, Deserialize)]
struct XRayDocument {
    asin: String,
    source: String,
    text_length: usize,
    terms: Vec<TermMentions>,
}

/// Selector-driven X-Ray builder.
pub struct BasicIndexBuilder {
    config: XRayConfig,
}

impl BasicIndexBuilder {
    pub fn new(config: XRayConfig) -> Self {
        Self { config }
    }

    /// Extracts terms from a book page.
    pub fn extract_terms(&self, page: &str, spoilers: bool) -> anyhow::Result<BookTerms> {
        let characters = parse_selector(&self.config.character_selector)?;
        let topics = parse_selector(&self.config.term_selector)?;
        let name = parse_selector(&self.config.name_selector)?;
        let description = parse_selector(&self.config.description_selector)?;

        let doc = Html::parse_document(page);
        let mut seen = HashSet::new();
        let mut terms = Vec::new();

        for (kind, selector) in [(TermKind::Character, &characters), (TermKind::Topic, &topics)] {
            for entry in doc.select(selector) {
                if !spoilers && self.is_spoiler(entry) {
                    continue;
                }

                let term_name = entry
                    .select(&name)
                    .next()
                    .map(element_text)
                    .unwrap_or_else(|| element_text(entry));
                if term_name.is_empty() || !seen.insert(term_name.clone()) {
                    continue;
                }

                let term_description = entry
                    .select(&description)
                    .next()
                    .map(element_text)
                    .unwrap_or_default();

                terms.push(Term {
                    kind,
                    name: term_name,
                    description: term_description,
                });
            }
        }

        Ok(BookTerms { terms })
    }

    fn is_spoiler(&self, entry: ElementRef) -> bool {
        entry
            .value()
            .classes()
            .any(|class| class == self.config.spoiler_class)
    }
}

#[async_trait]
impl IndexBuilder for BasicIndexBuilder {
    type RemoteData = BookTerms;
    type BookData = BookMentions;

    async fn parse_remote_data(
        &self,
        connections: &mut Connections,
        url: &str,
        spoilers: bool,
    ) -> anyhow::Result<BookTerms> {
        let page = connections
            .metadata
            .fetch_page(url)
            .await
            .with_context(|| format!("could not fetch {}", url))?;

        let terms = self.extract_terms(&page, spoilers)?;
        if terms.terms.is_empty() {
            anyhow::bail!("no characters or terms found on {}", url);
        }
        tracing::debug!(url, terms = terms.terms.len(), "Parsed remote book page");
        Ok(terms)
    }

    fn parse_book_data(&self, book_path: &Path, remote: &BookTerms) -> anyhow::Result<BookMentions> {
        let book = MobiBook::open(book_path)
            .with_context(|| format!("could not open {}", book_path.display()))?;
        let text = book.text()?;
        let text = String::from_utf8_lossy(&text);

        let terms = remote
            .terms
            .iter()
            .map(|term| {
                let locations: Vec<usize> =
                    text.match_indices(term.name.as_str()).map(|(pos, _)| pos).collect();
                let excerpt = locations
                    .first()
                    .map(|&pos| excerpt(&text, pos, term.name.len()));
                TermMentions {
                    term: term.clone(),
                    locations,
                    excerpt,
                }
            })
            .collect();

        Ok(BookMentions {
            text_length: text.len(),
            terms,
        })
    }

    fn write_index(
        &self,
        index_dir: &Path,
        asin: &Asin,
        remote_url: &str,
        book: &BookMentions,
    ) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(index_dir)
            .with_context(|| format!("could not create {}", index_dir.display()))?;

        let document = XRayDocument {
            asin: asin.to_string(),
            source: remote_url.to_string(),
            text_length: book.text_length,
            terms: book.terms.clone(),
        };

        let path = index_dir.join(artifact_file_name(asin));
        std::fs::write(&path, serde_json::to_vec_pretty(&document)?)
            .with_context(|| format!("could not write {}", path.display()))?;
        Ok(path)
    }
}

fn parse_selector(selector: &str) -> anyhow::Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow::anyhow!("invalid selector '{}': {}", selector, e))
}

fn element_text(element: ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Returns the text around `pos`, cut on character boundaries.
fn excerpt(text: &str, pos: usize, len: usize) -> String {
    let mut start = pos.saturating_sub(EXCERPT_RADIUS);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (pos + len + EXCERPT_RADIUS).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    text[start..end].split_whitespace().collect::<Vec<_>>().join(" ")
}
