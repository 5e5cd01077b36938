//! docshelf - a local library of documentation docsets.
//!
//! docshelf keeps an ordered registry of installed docset bundles, searches
//! their embedded [Tantivy](https://github.com/quickwit-oss/tantivy) content
//! stores, reorders results using recorded preferences, and serves docset
//! pages and searches for virtual `dash-docset://` URLs.
//!
//! # Quick start
//!
//! ```no_run
//! use docshelf::{DataDir, DocsetRegistry, Reranker};
//! use docshelf::search::{self, SearchParams};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let registry = DocsetRegistry::open(data_dir.clone()).unwrap();
//! let reranker = Reranker::open(&data_dir.ranks_db()).unwrap();
//!
//! let results = search::execute_search(
//!     &registry,
//!     &reranker,
//!     &SearchParams::new("str join"),
//! )
//! .unwrap();
//! for r in &results {
//!     println!("{} {} (score: {:.3})", r.docset, r.name, r.score);
//! }
//! ```

pub mod bundle;
pub mod codec;
pub mod data_dir;
pub mod docset;
pub mod docset_url;
pub mod error;
pub mod rank;
pub mod registry;
pub mod registry_db;
pub mod reranker;
pub mod result;
pub mod search;
pub mod store;
pub mod text_util;
pub mod transport;
pub mod types;
pub mod walker;

pub use data_dir::DataDir;
pub use docset::Docset;
pub use error::{Error, Result};
pub use registry::{DocsetRegistry, DocsetsChanged};
pub use reranker::Reranker;
pub use result::ResultNode;
pub use store::ContentStore;
pub use transport::{ContentTransport, Outcome, TransportConfig};
