//! Full-text index over agent name, description and capability tags.
//!
//! Backed by tantivy, which scores matches with BM25. Both record store
//! adapters keep one [`LexicalIndex`] next to their tables and update it on
//! every agent write; `lexical_search` is answered from the index alone.
//!
//! Words are split on non-alphanumeric characters. Runs of CJK ideographs
//! and kana have no word boundaries, so [`AgentTextTokenizer`] emits each
//! character plus every overlapping character bigram.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, STORED, STRING,
};
use tantivy::tokenizer::{
    LowerCaser, RemoveLongFilter, TextAnalyzer, Token, TokenStream, Tokenizer,
};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, info};

use crate::address::Address;
use crate::error::{Error, Result};
use crate::model::Agent;

/// Name under which the agent text analyzer is registered on the index.
pub const TOKENIZER_AGENT_TEXT: &str = "agentdns_text_v1";

/// Tokens longer than this many bytes are dropped.
const MAX_TOKEN_LENGTH: usize = 64;

/// Writer heap budget (tantivy's minimum for one indexing thread).
const WRITER_MEMORY_BYTES: usize = 15_000_000;

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

/// Splits text into words and CJK character n-grams.
#[derive(Debug, Clone, Default)]
pub struct AgentTextTokenizer;

/// Token stream produced by [`AgentTextTokenizer`].
pub struct AgentTokenStream {
    tokens: std::vec::IntoIter<Token>,
    token: Token,
}

impl Tokenizer for AgentTextTokenizer {
    type TokenStream<'a> = AgentTokenStream;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> Self::TokenStream<'a> {
        AgentTokenStream {
            tokens: split_agent_text(text).into_iter(),
            token: Token::default(),
        }
    }
}

impl TokenStream for AgentTokenStream {
    fn advance(&mut self) -> bool {
        match self.tokens.next() {
            Some(token) => {
                self.token = token;
                true
            }
            None => false,
        }
    }

    fn token(&self) -> &Token {
        &self.token
    }

    fn token_mut(&mut self) -> &mut Token {
        &mut self.token
    }
}

fn split_agent_text(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word_start: Option<usize> = None;
    let mut run: Vec<(usize, char)> = Vec::new();

    for (offset, c) in text.char_indices() {
        if is_cjk(c) {
            flush_word(text, &mut word_start, offset, &mut tokens);
            run.push((offset, c));
        } else if c.is_alphanumeric() {
            flush_run(&mut run, &mut tokens);
            word_start.get_or_insert(offset);
        } else {
            flush_word(text, &mut word_start, offset, &mut tokens);
            flush_run(&mut run, &mut tokens);
        }
    }
    flush_word(text, &mut word_start, text.len(), &mut tokens);
    flush_run(&mut run, &mut tokens);
    tokens
}

fn push_token(tokens: &mut Vec<Token>, offset_from: usize, offset_to: usize, text: String) {
    tokens.push(Token {
        offset_from,
        offset_to,
        position: tokens.len(),
        text,
        position_length: 1,
    });
}

fn flush_word(text: &str, start: &mut Option<usize>, end: usize, tokens: &mut Vec<Token>) {
    if let Some(from) = start.take() {
        push_token(tokens, from, end, text[from..end].to_string());
    }
}

fn flush_run(run: &mut Vec<(usize, char)>, tokens: &mut Vec<Token>) {
    for &(offset, c) in run.iter() {
        push_token(tokens, offset, offset + c.len_utf8(), c.to_string());
    }
    for pair in run.windows(2) {
        let (from, first) = pair[0];
        let (second_offset, second) = pair[1];
        let bigram: String = [first, second].iter().collect();
        push_token(tokens, from, second_offset + second.len_utf8(), bigram);
    }
    run.clear();
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF      // Hiragana, Katakana
        | 0x3400..=0x4DBF    // CJK Extension A
        | 0x4E00..=0x9FFF    // CJK Unified Ideographs
        | 0xF900..=0xFAFF    // CJK Compatibility Ideographs
        | 0x20000..=0x2FA1F) // Extensions B-F, supplement
}

/// The analyzer used for indexing and for query terms:
/// word/CJK split, then lowercase, then drop overlong tokens.
pub fn agent_text_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(AgentTextTokenizer)
        .filter(LowerCaser)
        .filter(RemoveLongFilter::limit(MAX_TOKEN_LENGTH))
        .build()
}

/// Run `text` through [`agent_text_analyzer`] and collect the token texts.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut analyzer = agent_text_analyzer();
    let mut stream = analyzer.token_stream(text);
    let mut out = Vec::new();
    while stream.advance() {
        out.push(stream.token().text.clone());
    }
    out
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct LexicalFields {
    address: Field,
    name: Field,
    description: Field,
    capabilities: Field,
}

impl LexicalFields {
    fn searchable(&self) -> [Field; 3] {
        [self.name, self.description, self.capabilities]
    }
}

fn build_schema() -> (Schema, LexicalFields) {
    let mut b = Schema::builder();
    let address = b.add_text_field("address", STRING | STORED);

    let text_options = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER_AGENT_TEXT)
            .set_index_option(IndexRecordOption::WithFreqs),
    );
    let name = b.add_text_field("name", text_options.clone());
    let description = b.add_text_field("description", text_options.clone());
    let capabilities = b.add_text_field("capabilities", text_options);

    let fields = LexicalFields {
        address,
        name,
        description,
        capabilities,
    };
    (b.build(), fields)
}

// ---------------------------------------------------------------------------
// LexicalIndex
// ---------------------------------------------------------------------------

/// BM25 full-text index of agents, keyed by canonical address.
///
/// Every write commits and reloads the reader, so a search issued after a
/// write returns sees it.
pub struct LexicalIndex {
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: LexicalFields,
}

impl LexicalIndex {
    /// Create an index held entirely in memory.
    pub fn in_memory() -> Result<Self> {
        let (schema, fields) = build_schema();
        Self::from_index(Index::create_in_ram(schema), fields)
    }

    /// Open the index at `dir`, creating it if the directory holds none.
    pub fn open(dir: &Path) -> Result<Self> {
        let (schema, fields) = build_schema();
        std::fs::create_dir_all(dir)?;

        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir)?
        } else {
            info!(path = %dir.display(), "creating lexical index");
            Index::create_in_dir(dir, schema)?
        };
        Self::from_index(index, fields)
    }

    fn from_index(index: Index, fields: LexicalFields) -> Result<Self> {
        index
            .tokenizers()
            .register(TOKENIZER_AGENT_TEXT, agent_text_analyzer());
        let writer = index.writer_with_num_threads(1, WRITER_MEMORY_BYTES)?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            reader,
            writer: Mutex::new(writer),
            fields,
        })
    }

    fn document(&self, agent: &Agent) -> TantivyDocument {
        let mut doc = TantivyDocument::default();
        doc.add_text(self.fields.address, agent.address.as_str());
        doc.add_text(self.fields.name, &agent.name);
        doc.add_text(self.fields.description, &agent.description);
        for tag in &agent.capabilities {
            doc.add_text(self.fields.capabilities, tag);
        }
        doc
    }

    fn address_term(&self, address: &Address) -> Term {
        Term::from_field_text(self.fields.address, address.as_str())
    }

    fn write<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut IndexWriter) -> Result<()>,
    {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| Error::Storage("lexical writer lock poisoned".into()))?;
        f(&mut writer)?;
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    /// Insert or replace the document of `agent`.
    pub fn upsert(&self, agent: &Agent) -> Result<()> {
        let doc = self.document(agent);
        let term = self.address_term(&agent.address);
        self.write(|writer| {
            writer.delete_term(term);
            writer.add_document(doc)?;
            Ok(())
        })?;
        debug!(address = %agent.address, "indexed agent text");
        Ok(())
    }

    /// Remove the document of `address`, if any.
    pub fn delete(&self, address: &Address) -> Result<()> {
        let term = self.address_term(address);
        self.write(|writer| {
            writer.delete_term(term);
            Ok(())
        })
    }

    /// Replace the whole index with documents for `agents`.
    pub fn rebuild(&self, agents: &[Agent]) -> Result<()> {
        let docs: Vec<TantivyDocument> = agents.iter().map(|a| self.document(a)).collect();
        self.write(|writer| {
            writer.delete_all_documents()?;
            for doc in docs {
                writer.add_document(doc)?;
            }
            Ok(())
        })?;
        info!(agents = agents.len(), "rebuilt lexical index");
        Ok(())
    }

    /// Number of indexed agents.
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Best `limit` matches for `query`, highest score first, ties broken by
    /// address ascending. Agents sharing no term with the query are omitted.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<(Address, f64)>> {
        let terms: BTreeSet<String> = tokenize(query).into_iter().collect();
        let searcher = self.reader.searcher();
        let limit = limit.min(searcher.num_docs() as usize);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for field in self.fields.searchable() {
            for term in &terms {
                clauses.push((
                    Occur::Should,
                    Box::new(TermQuery::new(
                        Term::from_field_text(field, term),
                        IndexRecordOption::WithFreqs,
                    )),
                ));
            }
        }
        let query = BooleanQuery::new(clauses);

        // Widen the window until the score at the cut-off is not shared by a
        // hit beyond it, so the address tie-break sees every tied candidate.
        let mut window = limit + 1;
        let hits = loop {
            let hits = searcher.search(&query, &TopDocs::with_limit(window))?;
            let tied_at_cut = hits.len() == window
                && hits.last().map(|h| h.0) == hits.get(limit - 1).map(|h| h.0);
            if !tied_at_cut {
                break hits;
            }
            window *= 2;
        };

        let mut scored = Vec::with_capacity(hits.len());
        for (score, doc_address) in hits {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            let address = doc
                .get_first(self.fields.address)
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::Storage("lexical document without address".into()))?;
            scored.push((Address::parse(address)?, f64::from(score)));
        }

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(limit);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(path: &str, name: &str, description: &str, tags: &[&str]) -> Agent {
        Agent::new(
            Address::parse(&format!("agentdns://org/{}", path)).unwrap(),
            name,
            description,
            "https://example.com",
        )
        .with_capabilities(tags.iter().copied())
    }

    fn index_with(agents: &[Agent]) -> LexicalIndex {
        let index = LexicalIndex::in_memory().unwrap();
        for a in agents {
            index.upsert(a).unwrap();
        }
        index
    }

    #[test]
    fn test_tokenize_words_and_cjk() {
        assert_eq!(tokenize("Image-Processing v2"), vec!["image", "processing", "v2"]);
        assert_eq!(
            tokenize("图像处理"),
            vec!["图", "像", "处", "理", "图像", "像处", "处理"]
        );
        assert_eq!(tokenize("AI绘画"), vec!["ai", "绘", "画", "绘画"]);
        assert!(tokenize("  -- ").is_empty());
    }

    #[test]
    fn test_search_orders_by_relevance() {
        let index = index_with(&[
            agent("a", "Translator", "Translates documents between languages", &["translation"]),
            agent("b", "Image Tool", "Edits and processes images", &["vision", "image"]),
            agent("c", "Paper Agent", "Summarizes academic papers", &["papers"]),
        ]);
        let ranked = index.search("image vision", 10).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0.as_str(), "agentdns://org/b");
        assert!(ranked[0].1 > 0.0);
    }

    #[test]
    fn test_search_cjk_query() {
        let index = index_with(&[
            agent("图像处理器", "图像处理器", "专业的图像处理助手", &["图像处理"]),
            agent("翻译专家", "翻译专家", "多语言翻译助手", &["翻译"]),
        ]);
        let ranked = index.search("图像编辑", 10).unwrap();
        assert_eq!(ranked[0].0.as_str(), "agentdns://org/图像处理器");
    }

    #[test]
    fn test_ties_break_by_address_across_the_limit() {
        let index = index_with(&[
            agent("z", "Echo", "echo", &[]),
            agent("m", "Echo", "echo", &[]),
            agent("a", "Echo", "echo", &[]),
        ]);
        let ranked = index.search("echo", 2).unwrap();
        let addrs: Vec<&str> = ranked.iter().map(|(a, _)| a.as_str()).collect();
        assert_eq!(addrs, vec!["agentdns://org/a", "agentdns://org/m"]);
        assert_eq!(ranked[0].1, ranked[1].1);
    }

    #[test]
    fn test_upsert_replaces_and_delete_removes() {
        let index = index_with(&[agent("a", "Echo", "repeats input", &[])]);
        index
            .upsert(&agent("a", "Weather", "reports forecasts", &[]))
            .unwrap();
        assert_eq!(index.num_docs(), 1);
        assert!(index.search("echo", 5).unwrap().is_empty());
        assert_eq!(index.search("forecasts", 5).unwrap().len(), 1);

        index
            .delete(&Address::parse("agentdns://org/a").unwrap())
            .unwrap();
        assert_eq!(index.num_docs(), 0);
        assert!(index.search("forecasts", 5).unwrap().is_empty());
    }

    #[test]
    fn test_rebuild_and_empty_query() {
        let index = index_with(&[agent("old", "Old", "stale entry", &[])]);
        index
            .rebuild(&[agent("a", "Echo", "echo", &[]), agent("b", "Echo", "echo", &[])])
            .unwrap();
        assert_eq!(index.num_docs(), 2);
        assert!(index.search("stale", 5).unwrap().is_empty());
        assert_eq!(index.search("echo", 1).unwrap().len(), 1);
        assert!(index.search("   ", 5).unwrap().is_empty());
    }
}
