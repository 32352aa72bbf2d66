//! Docstash keeps json documents in sqlite and queries them with mongodb style filters.
//!
//! ## Internals
//! Every collection is a table with a single text column holding the json encoding of one document.
//! Filters are translated by [`query_translator::QueryTranslator`] into sql predicates over sqlite's
//! `json_extract`, e.g. `{"age": {"$gt": 30}}` becomes `json_extract(data, '$.age') > ?1`. Literal values
//! are always bound as parameters. Because `json_extract` is deterministic, indexes can be built on the same
//! expressions with [`collection::Collection::add_index`], and sqlite will use them for matching filters.
//!
//! Booleans deserve a note: `json_extract` returns `true`/`false` as `1`/`0`, so `{"flag": true}` is
//! translated to `json_extract(data, '$.flag') > 0` and `{"flag": false}` to `... = 0`.
//!
//! Updates either replace the stored document (keeping its `_id`) or, with `$set`, merge a partial
//! document into it through `json_patch`.
//!
//! ```no_run
//! use docstash::store::Store;
//! use docstash::update_options;
//! use serde_json::json;
//!
//! let store = Store::open("people.db")?;
//! let people = store.collection("people")?;
//! people.add_index("age")?;
//! let id = people.insert(&json!({"name": "ann", "age": 40}))?;
//! people.update(&json!({"_id": id}), &json!({"$set": {"age": 41}}), update_options!())?;
//! let found = people.find(&json!({"age": {"$gte": 18}}))?;
//! # Ok::<(), docstash::Error>(())
//! ```

pub mod base;
pub mod collection;
pub mod error;
pub mod object_id;
pub mod query_translator;
pub mod store;

pub use base::{CollectionConfig, ErrorPolicy, UpdateOptions, UpdateResult};
pub use collection::Collection;
pub use error::{Error, Result};
pub use store::Store;
