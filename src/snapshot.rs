use crate::model::Person;
use crate::policy::QTable;
use anyhow::{Context, Result};
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Frozen copy of every agent's decision table, keyed by [`Person::key`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    tables: BTreeMap<String, QTable>,
}

impl PolicySnapshot {
    /// Copy the current tables of `people`.
    pub fn extract(people: &[Person]) -> Self {
        let tables = people
            .iter()
            .map(|person| (person.key(), person.policy.q_table.clone()))
            .collect();
        Self { tables }
    }

    pub fn get(&self, key: &str) -> Option<&QTable> {
        self.tables.get(key)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Install the snapshot into `people` for pure exploitation.
    ///
    /// Agents with a matching key get a copy of their table and an
    /// exploration rate of 0; others are left untouched. Returns the number
    /// of agents restored.
    pub fn restore(&self, people: &mut [Person]) -> usize {
        let mut n_restored = 0;
        for person in people {
            if let Some(table) = self.tables.get(&person.key()) {
                person.policy.q_table = table.clone();
                person.policy.epsilon = 0.0;
                n_restored += 1;
            }
        }
        n_restored
    }

    pub fn save<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write_named(&mut writer, self).context("failed to serialize policy snapshot")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let snapshot: Self =
            decode::from_read(&mut reader).context("failed to deserialize policy snapshot")?;
        for (key, table) in &snapshot.tables {
            table
                .validate()
                .with_context(|| format!("invalid table for {key}"))?;
        }
        Ok(snapshot)
    }
}
