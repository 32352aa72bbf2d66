use slugify::slugify;

/// The single text column every collection table stores its documents in.
pub const DATA_COLUMN: &str = "data";

/// What a collection does with a failure raised by sqlite while executing a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Return the failure to the caller.
    Propagate,
    /// Log the failure and answer as if the statement matched nothing.
    LogAndContinue,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        ErrorPolicy::Propagate
    }
}

#[derive(Clone, Debug)]
pub struct CollectionConfig {
    pub name: String,
    pub table_name: String,
    pub error_policy: ErrorPolicy,
    /// Seed for the identifier generator. `None` seeds from the OS.
    pub rng_seed: Option<u64>,
}

impl CollectionConfig {
    pub fn default(name: &str) -> CollectionConfig {
        CollectionConfig {
            name: name.to_string(),
            table_name: name.to_string(),
            error_policy: ErrorPolicy::default(),
            rng_seed: None,
        }
    }

    /// Keeps the documents in `args` instead of a table named after the collection.
    pub fn table<'a>(&'a mut self, args: &str) -> &'a mut CollectionConfig {
        self.table_name = args.to_string();
        self
    }

    pub fn error_policy<'a>(&'a mut self, args: ErrorPolicy) -> &'a mut CollectionConfig {
        self.error_policy = args;
        self
    }

    pub fn seed<'a>(&'a mut self, args: u64) -> &'a mut CollectionConfig {
        self.rng_seed = Some(args);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// The caller expects the filter may match several documents. Without it the
    /// filter has to name an `_id`. The statement itself is not limited to one row.
    pub multi: bool,
    /// Insert the update expression when the filter matches nothing.
    pub upsert: bool,
}

impl UpdateOptions {
    pub fn multi<'a>(&'a mut self, arg: bool) -> &'a mut UpdateOptions {
        self.multi = arg;
        self
    }

    pub fn upsert<'a>(&'a mut self, arg: bool) -> &'a mut UpdateOptions {
        self.upsert = arg;
        self
    }
}

/// Builds [`UpdateOptions`] with the named flags switched on, e.g. `update_options!(multi, upsert)`.
#[macro_export]
macro_rules! update_options {
    () => {
        $crate::base::UpdateOptions::default()
    };

    ($($flag:ident),+) => {
        *$crate::base::UpdateOptions::default()$(.$flag(true))+
    };
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub modified_count: usize,
    /// Set when an upsert inserted a new document instead of updating.
    pub upserted_id: Option<String>,
}

/// Double-quotes an sql identifier.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn where_clause(where_str: &str) -> String {
    if where_str.len() > 0 {
        format!("WHERE {}", where_str)
    } else {
        String::new()
    }
}

/// Deterministic index name for `field` on `collection`.
///
/// The slugs only make the name readable; two fields may slugify to the same text
/// (`a.b` and `a_b`), so the hash of the raw pair keeps names apart.
pub fn index_name(collection: &str, field: &str) -> String {
    let hash = blake3::hash(format!("{}\0{}", collection, field).as_bytes());
    format!("{}_{}_{}", slugify!(collection, separator = "_"), slugify!(field, separator = "_"), hex::encode(&hash.as_bytes()[..6]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_name_is_deterministic() {
        assert_eq!(index_name("people", "age"), index_name("people", "age"));
        assert!(index_name("people", "age").starts_with("people_age_"));
    }

    #[test]
    fn test_index_name_keeps_similar_fields_apart() {
        assert_ne!(index_name("people", "a.b"), index_name("people", "a_b"));
        assert_ne!(index_name("a_b", "c"), index_name("a", "b_c"));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("people"), "\"people\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_where_clause() {
        assert_eq!(where_clause(""), "");
        assert_eq!(where_clause("1"), "WHERE 1");
    }

    #[test]
    fn test_update_options_macro() {
        let opts = update_options!(multi, upsert);
        assert!(opts.multi && opts.upsert);
        let opts = update_options!(upsert);
        assert!(!opts.multi && opts.upsert);
        assert_eq!(update_options!(), UpdateOptions::default());
    }

    #[test]
    fn test_collection_config_builder() {
        let config = CollectionConfig::default("people").seed(7).error_policy(ErrorPolicy::LogAndContinue).clone();
        assert_eq!(config.table_name, "people");
        assert_eq!(config.rng_seed, Some(7));
        assert_eq!(config.error_policy, ErrorPolicy::LogAndContinue);

        let config = CollectionConfig::default("people").table("people_v2").clone();
        assert_eq!(config.name, "people");
        assert_eq!(config.table_name, "people_v2");
    }
}
