//! Association engine configuration

use serde::Deserialize;

/// Configuration shared by the schema, the preloader and the join builder
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AssociationConfig {
    /// Prefix applied to derived table names (including habtm join tables)
    pub table_name_prefix: String,
    /// Suffix applied to derived table names (including habtm join tables)
    pub table_name_suffix: String,
    /// Derive table names in plural form (`Author` -> `authors`)
    pub pluralize_table_names: bool,
    /// Issue the per-chunk batch queries of one preload concurrently
    pub parallel_batches: bool,
    /// Overrides the IN-list limit reported by the executor
    pub max_ids_in_list: Option<usize>,
    /// Overrides the identifier length limit reported by the executor
    pub table_alias_length: Option<usize>,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            table_name_prefix: String::new(),
            table_name_suffix: String::new(),
            pluralize_table_names: true,
            parallel_batches: false,
            max_ids_in_list: None,
            table_alias_length: None,
        }
    }
}

impl AssociationConfig {
    /// Build a configuration from `ELIF_ORM_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(prefix) = std::env::var("ELIF_ORM_TABLE_PREFIX") {
            config.table_name_prefix = prefix;
        }
        if let Ok(suffix) = std::env::var("ELIF_ORM_TABLE_SUFFIX") {
            config.table_name_suffix = suffix;
        }
        if let Some(parallel) = parse_env::<bool>("ELIF_ORM_PARALLEL_BATCHES") {
            config.parallel_batches = parallel;
        }
        if let Some(limit) = parse_env::<usize>("ELIF_ORM_MAX_IDS_IN_LIST") {
            config.max_ids_in_list = Some(limit).filter(|limit| *limit > 0);
        }
        if let Some(length) = parse_env::<usize>("ELIF_ORM_TABLE_ALIAS_LENGTH") {
            config.table_alias_length = Some(length);
        }

        config
    }

    pub fn with_table_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_name_prefix = prefix.into();
        self
    }

    pub fn with_table_name_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.table_name_suffix = suffix.into();
        self
    }

    pub fn with_parallel_batches(mut self, parallel: bool) -> Self {
        self.parallel_batches = parallel;
        self
    }

    pub fn with_max_ids_in_list(mut self, limit: Option<usize>) -> Self {
        self.max_ids_in_list = limit;
        self
    }

    /// Decorate an undecorated table name with the configured prefix and suffix
    pub fn decorate_table_name(&self, table: &str) -> String {
        format!("{}{}{}", self.table_name_prefix, table, self.table_name_suffix)
    }

    /// Strip the configured prefix and suffix from a decorated table name
    pub fn undecorate_table_name<'a>(&self, table: &'a str) -> &'a str {
        let table = table
            .strip_prefix(self.table_name_prefix.as_str())
            .unwrap_or(table);
        table
            .strip_suffix(self.table_name_suffix.as_str())
            .unwrap_or(table)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparsable value {:?} for {}", raw, key);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AssociationConfig::default();
        assert!(config.pluralize_table_names);
        assert!(!config.parallel_batches);
        assert_eq!(config.max_ids_in_list, None);
        assert_eq!(config.decorate_table_name("posts"), "posts");
    }

    #[test]
    fn test_table_name_decoration_round_trip() {
        let config = AssociationConfig::default()
            .with_table_name_prefix("app_")
            .with_table_name_suffix("_v2");
        assert_eq!(config.decorate_table_name("posts"), "app_posts_v2");
        assert_eq!(config.undecorate_table_name("app_posts_v2"), "posts");
        assert_eq!(config.undecorate_table_name("legacy"), "legacy");
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: AssociationConfig =
            serde_json::from_value(serde_json::json!({ "parallel_batches": true, "max_ids_in_list": 1000 }))
                .unwrap();
        assert!(config.parallel_batches);
        assert_eq!(config.max_ids_in_list, Some(1000));
        assert!(config.pluralize_table_names);
    }
}
