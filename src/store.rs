use std::{
    path::Path,
    sync::{Arc, OnceLock},
};

use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    Searcher,
    TantivyDocument,
    Term,
    collector::TopDocs,
    query::{BooleanQuery, FuzzyTermQuery, Occur, Query, QueryParser, TermQuery},
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
        TokenStream,
    },
};

use crate::{
    codec::{ColumnCodec, ZlibCodec},
    error::Result,
    rank::{MatchRank, MatchStats, RankFunction},
};

/// Field names used in the schema.
pub mod fields {
    pub const NAME: &str = "name";
    pub const ENTRY_TYPE: &str = "entry_type";
    pub const PATH: &str = "path";
    pub const PAGE: &str = "page";
    pub const PARENT: &str = "parent";
    pub const BODY: &str = "body";
    pub const BODY_TEXT: &str = "body_text";
    pub const CONTENT: &str = "content";
}

const NAME_TOKENIZER: &str = "docset_name";
const BODY_TOKENIZER: &str = "en_stem";

/// Candidates fetched from the engine per requested hit before reranking.
const CANDIDATE_FACTOR: usize = 4;

/// Functions registered into a store handle before it may be queried.
#[derive(Clone)]
pub struct StoreFunctions {
    pub rank: Arc<dyn RankFunction>,
    pub codec: Arc<dyn ColumnCodec>,
}

impl Default for StoreFunctions {
    fn default() -> Self {
        Self {
            rank: Arc::new(MatchRank),
            codec: Arc::new(ZlibCodec::default()),
        }
    }
}

impl std::fmt::Debug for StoreFunctions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreFunctions").finish_non_exhaustive()
    }
}

/// The full-text index embedded in one docset.
pub struct ContentStore {
    index: Index,
    reader: IndexReader,
    schema: Schema,
    functions: OnceLock<StoreFunctions>,
}

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
pub struct SchemaFields {
    pub name: Field,
    pub entry_type: Field,
    pub path: Field,
    pub page: Field,
    pub parent: Field,
    pub body: Field,
    pub body_text: Field,
    pub content: Field,
}

/// One entry to be written into a store.
#[derive(Debug, Clone, Default)]
pub struct IndexEntry {
    pub name: String,
    pub entry_type: String,
    /// Page path inside `Documents/`, optionally with a `#fragment`.
    pub path: String,
    /// Name of the enclosing entry, if this one is nested.
    pub parent: Option<String>,
    /// Plain text indexed for full-text matching.
    pub body: String,
    /// Raw page bytes kept in the compressed content column.
    pub content: Option<Vec<u8>>,
}

/// A ranked hit from a store query.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHit {
    pub score: f64,
    pub name: String,
    pub entry_type: String,
    pub path: String,
    pub parent: Option<String>,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let name_opts = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(NAME_TOKENIZER)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();
    let name = builder.add_text_field(fields::NAME, name_opts);
    let entry_type =
        builder.add_text_field(fields::ENTRY_TYPE, STRING | STORED);
    let path = builder.add_text_field(fields::PATH, STRING | STORED);
    let page = builder.add_text_field(fields::PAGE, STRING);
    let parent = builder.add_text_field(fields::PARENT, STRING | STORED);

    let body_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(BODY_TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );
    let body = builder.add_text_field(fields::BODY, body_opts);
    let body_text = builder.add_bytes_field(fields::BODY_TEXT, STORED);
    let content = builder.add_bytes_field(fields::CONTENT, STORED);

    let schema = builder.build();
    let fields = SchemaFields {
        name,
        entry_type,
        path,
        page,
        parent,
        body,
        body_text,
        content,
    };

    (schema, fields)
}

fn register_tokenizers(index: &Index) {
    let name = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(64))
        .filter(LowerCaser)
        .build();
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register(NAME_TOKENIZER, name);
    index.tokenizers().register(BODY_TOKENIZER, en_stem);
}

impl ContentStore {
    /// Open or create a content store at the given directory.
    ///
    /// The handle cannot be queried until [`register_functions`] ran.
    ///
    /// [`register_functions`]: ContentStore::register_functions
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (schema, _) = build_schema();

        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            Index::open(mmap_dir)?
        } else {
            Index::create(
                mmap_dir,
                schema.clone(),
                tantivy::IndexSettings::default(),
            )?
        };

        Self::from_index(index, schema)
    }

    /// Create an in-memory content store (for testing).
    pub fn open_in_ram() -> Result<Self> {
        let (schema, _) = build_schema();
        let index = Index::create_in_ram(schema.clone());
        Self::from_index(index, schema)
    }

    /// Open a store and register the default functions on it.
    pub fn open_registered(dir: &Path) -> Result<Self> {
        let store = Self::open(dir)?;
        store.register_functions(StoreFunctions::default());
        Ok(store)
    }

    fn from_index(index: Index, schema: Schema) -> Result<Self> {
        register_tokenizers(&index);
        let reader = index.reader()?;

        Ok(Self {
            index,
            reader,
            schema,
            functions: OnceLock::new(),
        })
    }

    /// Register the rank function and column codec for this handle.
    ///
    /// Returns `false` if functions were already registered; the first
    /// registration stays in effect.
    pub fn register_functions(&self, functions: StoreFunctions) -> bool {
        self.functions.set(functions).is_ok()
    }

    pub fn is_registered(&self) -> bool {
        self.functions.get().is_some()
    }

    fn functions(&self) -> &StoreFunctions {
        let Some(functions) = self.functions.get() else {
            panic!("content store used before its functions were registered");
        };
        functions
    }

    /// Get the resolved field handles.
    pub fn fields(&self) -> SchemaFields {
        let f = |name: &str| self.schema.get_field(name).unwrap();
        SchemaFields {
            name: f(fields::NAME),
            entry_type: f(fields::ENTRY_TYPE),
            path: f(fields::PATH),
            page: f(fields::PAGE),
            parent: f(fields::PARENT),
            body: f(fields::BODY),
            body_text: f(fields::BODY_TEXT),
            content: f(fields::CONTENT),
        }
    }

    /// Create a writer with the given memory budget (in bytes).
    pub fn writer(&self, memory_budget: usize) -> Result<IndexWriter> {
        Ok(self.index.writer(memory_budget)?)
    }

    /// Add an entry to the store via the given writer.
    ///
    /// An existing entry with the same path is replaced.
    pub fn add_entry(
        &self,
        writer: &IndexWriter,
        entry: &IndexEntry,
    ) -> Result<()> {
        let f = self.fields();
        let codec = &self.functions().codec;

        writer.delete_term(Term::from_field_text(f.path, &entry.path));

        let mut doc = TantivyDocument::default();
        doc.add_text(f.name, &entry.name);
        doc.add_text(f.entry_type, &entry.entry_type);
        doc.add_text(f.path, &entry.path);
        doc.add_text(f.page, page_of(&entry.path));
        doc.add_text(f.parent, entry.parent.as_deref().unwrap_or(""));
        doc.add_text(f.body, &entry.body);
        if !entry.body.is_empty() {
            let packed = codec.compress(entry.body.as_bytes())?;
            doc.add_bytes(f.body_text, packed.as_slice());
        }
        if let Some(content) = &entry.content {
            let packed = codec.compress(content)?;
            doc.add_bytes(f.content, packed.as_slice());
        }
        writer.add_document(doc)?;

        Ok(())
    }

    /// Number of entries visible to searches.
    pub fn num_entries(&self) -> Result<u64> {
        self.reader.reload()?;
        Ok(self.reader.searcher().num_docs())
    }

    /// Search entry names and page bodies.
    ///
    /// Name terms also match as prefixes. The engine's candidates are
    /// rescored by the registered rank function and the best `limit` are
    /// returned, highest score first.
    pub fn search(
        &self,
        query_str: &str,
        limit: usize,
    ) -> Result<Vec<StoreHit>> {
        let functions = self.functions();
        let f = self.fields();
        self.reader.reload()?;
        let searcher = self.reader.searcher();

        let name_terms = self.analyze(NAME_TOKENIZER, query_str);
        let body_terms = self.analyze(BODY_TOKENIZER, query_str);
        if name_terms.is_empty() && body_terms.is_empty() {
            return Ok(vec![]);
        }

        let mut parser =
            QueryParser::for_index(&self.index, vec![f.name, f.body]);
        parser.set_field_boost(f.name, 2.0);
        let (parsed, _errors) = parser.parse_query_lenient(query_str);

        let mut clauses: Vec<(Occur, Box<dyn Query>)> =
            vec![(Occur::Should, parsed)];
        for term in &name_terms {
            let term = Term::from_field_text(f.name, term);
            clauses.push((
                Occur::Should,
                Box::new(FuzzyTermQuery::new_prefix(term, 0, true)),
            ));
        }
        let query = BooleanQuery::new(clauses);

        let candidates = limit.saturating_mul(CANDIDATE_FACTOR).max(limit);
        let top_docs =
            searcher.search(&query, &TopDocs::with_limit(candidates))?;

        let query_lower = query_str.trim().to_lowercase();
        let doc_freq =
            self.doc_freqs(&searcher, &f, &name_terms, &body_terms)?;
        let num_docs = searcher.num_docs();

        let mut hits = Vec::with_capacity(top_docs.len());
        for (engine_score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let name = extract_text(&doc, f.name);
            let body = self.stored_body(&doc, &f)?;

            let name_tokens = self.analyze(NAME_TOKENIZER, &name);
            let body_tokens = self.analyze(BODY_TOKENIZER, &body);
            let name_lower = name.to_lowercase();

            let stats = MatchStats {
                name_hits: count_hits(&name_terms, &name_tokens),
                body_hits: count_hits(&body_terms, &body_tokens),
                doc_freq: doc_freq.clone(),
                num_docs,
                exact_name: name_lower == query_lower,
                prefix_name: !query_lower.is_empty()
                    && name_lower.starts_with(&query_lower),
                engine_score,
                name_len: name.chars().count(),
            };

            let parent = extract_text(&doc, f.parent);
            hits.push(StoreHit {
                score: functions.rank.score(&stats),
                name,
                entry_type: extract_text(&doc, f.entry_type),
                path: extract_text(&doc, f.path),
                parent: (!parent.is_empty()).then_some(parent),
            });
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Decompressed content of a page, looked up by its path.
    ///
    /// Any `#fragment` on `path` is ignored.
    pub fn page_content(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let codec = &self.functions().codec;
        let f = self.fields();
        self.reader.reload()?;
        let searcher = self.reader.searcher();

        let term = Term::from_field_text(f.page, page_of(path));
        let query = TermQuery::new(term, IndexRecordOption::Basic);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(16))?;

        for (_score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(bytes) =
                doc.get_first(f.content).and_then(|v| v.as_bytes())
            {
                return codec.decompress(bytes).map(Some);
            }
        }
        Ok(None)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn stored_body(
        &self,
        doc: &TantivyDocument,
        f: &SchemaFields,
    ) -> Result<String> {
        let Some(bytes) =
            doc.get_first(f.body_text).and_then(|v| v.as_bytes())
        else {
            return Ok(String::new());
        };
        let raw = self.functions().codec.decompress(bytes)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    fn doc_freqs(
        &self,
        searcher: &Searcher,
        f: &SchemaFields,
        name_terms: &[String],
        body_terms: &[String],
    ) -> Result<Vec<u64>> {
        let terms = name_terms.len().max(body_terms.len());
        let mut out = Vec::with_capacity(terms);
        for i in 0..terms {
            let in_name = match name_terms.get(i) {
                Some(t) => {
                    searcher.doc_freq(&Term::from_field_text(f.name, t))?
                }
                None => 0,
            };
            let in_body = match body_terms.get(i) {
                Some(t) => {
                    searcher.doc_freq(&Term::from_field_text(f.body, t))?
                }
                None => 0,
            };
            out.push(in_name.max(in_body));
        }
        Ok(out)
    }

    fn analyze(&self, tokenizer: &str, text: &str) -> Vec<String> {
        let Some(mut analyzer) = self.index.tokenizers().get(tokenizer) else {
            return vec![];
        };
        let mut tokens = Vec::new();
        let mut stream = analyzer.token_stream(text);
        stream.process(&mut |token| tokens.push(token.text.clone()));
        tokens
    }
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("registered", &self.is_registered())
            .finish_non_exhaustive()
    }
}

/// Page path with any fragment removed.
pub fn page_of(path: &str) -> &str {
    path.split_once('#').map_or(path, |(page, _)| page)
}

fn count_hits(terms: &[String], tokens: &[String]) -> Vec<u32> {
    terms
        .iter()
        .map(|term| {
            let n = tokens.iter().filter(|t| *t == term).count();
            u32::try_from(n).unwrap_or(u32::MAX)
        })
        .collect()
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, path: &str, body: &str) -> IndexEntry {
        IndexEntry {
            name: name.to_string(),
            entry_type: "Function".to_string(),
            path: path.to_string(),
            parent: None,
            body: body.to_string(),
            content: Some(body.as_bytes().to_vec()),
        }
    }

    fn store_with(entries: &[IndexEntry]) -> ContentStore {
        let store = ContentStore::open_in_ram().unwrap();
        store.register_functions(StoreFunctions::default());
        let mut writer = store.writer(15_000_000).unwrap();
        for e in entries {
            store.add_entry(&writer, e).unwrap();
        }
        writer.commit().unwrap();
        store
    }

    #[test]
    fn create_and_search() {
        let store = store_with(&[
            entry("join", "str.html#join", "Return a string joined"),
            entry("split", "str.html#split", "Split a string apart"),
        ]);

        let hits = store.search("join", 10).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].name, "join");
        assert_eq!(hits[0].path, "str.html#join");
        assert_eq!(hits[0].entry_type, "Function");
    }

    #[test]
    fn exact_name_ranks_first() {
        let store = store_with(&[
            entry("joinpath", "path.html#joinpath", "join path parts"),
            entry("join", "str.html#join", "concatenate"),
        ]);

        let hits = store.search("join", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].name, "join");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn name_prefix_matches() {
        let store = store_with(&[entry(
            "startswith",
            "str.html#startswith",
            "test a prefix",
        )]);

        let hits = store.search("starts", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "startswith");
    }

    #[test]
    fn empty_query_returns_nothing() {
        let store = store_with(&[entry("join", "a.html", "x")]);
        assert!(store.search("   ", 10).unwrap().is_empty());
    }

    #[test]
    fn limit_truncates() {
        let entries: Vec<_> = (0..10)
            .map(|i| entry(&format!("item{i}"), &format!("{i}.html"), "item"))
            .collect();
        let store = store_with(&entries);
        assert_eq!(store.search("item", 3).unwrap().len(), 3);
    }

    #[test]
    fn parent_is_reported() {
        let store = ContentStore::open_in_ram().unwrap();
        store.register_functions(StoreFunctions::default());
        let mut writer = store.writer(15_000_000).unwrap();
        store
            .add_entry(
                &writer,
                &IndexEntry {
                    name: "append".into(),
                    entry_type: "Method".into(),
                    path: "list.html#append".into(),
                    parent: Some("list".into()),
                    body: "append an item".into(),
                    content: None,
                },
            )
            .unwrap();
        writer.commit().unwrap();

        let hits = store.search("append", 5).unwrap();
        assert_eq!(hits[0].parent.as_deref(), Some("list"));
    }

    #[test]
    fn page_content_roundtrips_through_codec() {
        let html = "<html><title>Str</title><body>join</body></html>";
        let store = store_with(&[IndexEntry {
            content: Some(html.as_bytes().to_vec()),
            ..entry("Str", "str.html", "join")
        }]);

        let content = store.page_content("str.html#join").unwrap().unwrap();
        assert_eq!(content, html.as_bytes());
        assert!(store.page_content("missing.html").unwrap().is_none());
    }

    #[test]
    fn same_path_replaces_entry() {
        let store = store_with(&[
            entry("old", "a.html", "old words"),
            entry("new", "a.html", "new words"),
        ]);
        assert_eq!(store.num_entries().unwrap(), 1);
        assert_eq!(store.search("words", 10).unwrap()[0].name, "new");
    }

    #[test]
    fn second_registration_is_ignored() {
        let store = ContentStore::open_in_ram().unwrap();
        assert!(!store.is_registered());
        assert!(store.register_functions(StoreFunctions::default()));
        assert!(!store.register_functions(StoreFunctions::default()));
        assert!(store.is_registered());
    }

    #[test]
    #[should_panic(expected = "before its functions were registered")]
    fn query_before_registration_panics() {
        let store = ContentStore::open_in_ram().unwrap();
        let _ = store.search("anything", 10);
    }

    #[test]
    fn disk_persistence() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("index");

        {
            let store = ContentStore::open_registered(&dir).unwrap();
            let mut writer = store.writer(15_000_000).unwrap();
            store
                .add_entry(&writer, &entry("persist", "p.html", "kept"))
                .unwrap();
            writer.commit().unwrap();
        }

        {
            let store = ContentStore::open_registered(&dir).unwrap();
            let hits = store.search("persist", 10).unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].path, "p.html");
        }
    }
}
