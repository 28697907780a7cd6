//! Collision-free table aliases

use std::collections::HashMap;

use regex::Regex;

use crate::query::TableRef;

/// Hands out table aliases, counting every use of a table name
///
/// The first use of a table gets its bare name. Later uses get the suggested alias,
/// truncated to the identifier limit, with a numeric suffix from the second use of
/// that alias on. Hand-written join fragments count towards the initial totals.
#[derive(Debug, Clone)]
pub struct AliasTracker {
    aliases: HashMap<String, usize>,
    table_joins: Vec<String>,
    table_alias_length: usize,
}

impl AliasTracker {
    pub fn new(table_alias_length: usize, table_joins: Vec<String>) -> Self {
        Self {
            aliases: HashMap::new(),
            table_joins,
            table_alias_length,
        }
    }

    pub fn aliased_table_for(&mut self, table_name: &str, aliased_name: &str) -> TableRef {
        let alias = self.aliased_name_for(table_name, aliased_name);
        TableRef::aliased(table_name, alias)
    }

    pub fn aliased_name_for(&mut self, table_name: &str, aliased_name: &str) -> String {
        if self.count(table_name) == 0 {
            self.aliases.insert(table_name.to_string(), 1);
            return table_name.to_string();
        }

        let aliased_name = self.table_alias_for(aliased_name);
        let count = self.count(&aliased_name) + 1;
        self.aliases.insert(aliased_name.clone(), count);

        if count > 1 {
            format!("{}_{}", self.truncate(&aliased_name), count)
        } else {
            aliased_name
        }
    }

    fn count(&mut self, name: &str) -> usize {
        if let Some(count) = self.aliases.get(name) {
            return *count;
        }
        let count = self.initial_count_for(name);
        self.aliases.insert(name.to_string(), count);
        count
    }

    fn initial_count_for(&self, name: &str) -> usize {
        if self.table_joins.is_empty() {
            return 0;
        }
        let pattern = format!(
            r#"join(?:\s+\w+)?\s+(\S+\s+)?["`]?{}["`]?\son"#,
            regex::escape(&name.to_lowercase())
        );
        let regex = match Regex::new(&pattern) {
            Ok(regex) => regex,
            Err(err) => {
                tracing::warn!("Cannot scan joins for table {}: {}", name, err);
                return 0;
            }
        };
        self.table_joins
            .iter()
            .map(|join| regex.find_iter(&join.to_lowercase()).count())
            .sum()
    }

    fn table_alias_for(&self, name: &str) -> String {
        name.chars()
            .take(self.table_alias_length)
            .collect::<String>()
            .replace('.', "_")
    }

    fn truncate(&self, name: &str) -> String {
        name.chars()
            .take(self.table_alias_length.saturating_sub(2))
            .collect()
    }
}
