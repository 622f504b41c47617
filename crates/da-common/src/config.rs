//! Run-configuration file parsing.
//!
//! Format is mode-specific and selected structurally: the caller knows
//! which mode it's launching in (set by which binary / subcommand is
//! invoked) and asks for the matching parse.

use std::fs;
use std::path::Path;

use crate::error::ConfigError;

/// Perfect-link mode: `<num_messages> <receiver_id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlConfig {
    pub num_messages: u32,
    pub receiver_id: u64,
}

/// FIFO broadcast mode: `<num_messages>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoConfig {
    pub num_messages: u32,
}

/// Lattice agreement mode: first line `<p> <vs> <ds>`, then `p` lines of
/// up to `vs` space-separated `u32` values each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatticeConfig {
    pub max_values_per_proposal: u32,
    pub max_distinct_values: u32,
    pub proposals: Vec<Vec<u32>>,
}

/// The parsed run configuration, tagged by mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunConfig {
    Pl(PlConfig),
    Fifo(FifoConfig),
    Lattice(LatticeConfig),
}

impl PlConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let (text, path_str) = read(path)?;
        let first = first_nonempty_line(&text, &path_str)?;
        let mut fields = first.1.split_whitespace();
        let num_messages = parse_field(&mut fields, &path_str, first.0, "num_messages")?;
        let receiver_id = parse_field(&mut fields, &path_str, first.0, "receiver_id")?;
        Ok(PlConfig {
            num_messages,
            receiver_id,
        })
    }
}

impl FifoConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let (text, path_str) = read(path)?;
        let first = first_nonempty_line(&text, &path_str)?;
        let mut fields = first.1.split_whitespace();
        let num_messages = parse_field(&mut fields, &path_str, first.0, "num_messages")?;
        Ok(FifoConfig { num_messages })
    }
}

impl LatticeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let (text, path_str) = read(path)?;
        let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());

        let (header_no, header) = lines
            .next()
            .ok_or_else(|| malformed(&path_str, 0, "missing header line"))?;
        let mut header_fields = header.split_whitespace();
        let num_proposals: u32 = parse_field(&mut header_fields, &path_str, header_no + 1, "p")?;
        let max_values_per_proposal: u32 =
            parse_field(&mut header_fields, &path_str, header_no + 1, "vs")?;
        let max_distinct_values: u32 =
            parse_field(&mut header_fields, &path_str, header_no + 1, "ds")?;

        let mut proposals = Vec::with_capacity(num_proposals as usize);
        for _ in 0..num_proposals {
            let (line_no, line) = lines.next().ok_or_else(|| {
                malformed(
                    &path_str,
                    header_no + 1,
                    "fewer proposal lines than declared",
                )
            })?;
            let values: Result<Vec<u32>, ConfigError> = line
                .split_whitespace()
                .map(|tok| {
                    tok.parse::<u32>()
                        .map_err(|_| malformed(&path_str, line_no + 1, "value is not a valid u32"))
                })
                .collect();
            let values = values?;
            if values.len() as u32 > max_values_per_proposal {
                return Err(ConfigError::ProposalTooWide {
                    line: line_no + 1,
                    count: values.len(),
                    max: max_values_per_proposal,
                });
            }
            proposals.push(values);
        }

        Ok(LatticeConfig {
            max_values_per_proposal,
            max_distinct_values,
            proposals,
        })
    }
}

fn read(path: impl AsRef<Path>) -> Result<(String, String), ConfigError> {
    let path_ref = path.as_ref();
    let path_str = path_ref.display().to_string();
    let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
        path: path_str.clone(),
        source,
    })?;
    Ok((text, path_str))
}

fn first_nonempty_line<'a>(text: &'a str, path: &str) -> Result<(usize, &'a str), ConfigError> {
    text.lines()
        .enumerate()
        .find(|(_, l)| !l.trim().is_empty())
        .ok_or_else(|| malformed(path, 0, "file is empty"))
}

fn parse_field<'a, T: std::str::FromStr>(
    fields: &mut impl Iterator<Item = &'a str>,
    path: &str,
    line: usize,
    name: &str,
) -> Result<T, ConfigError> {
    fields
        .next()
        .ok_or_else(|| malformed(path, line, &format!("missing {name} field")))?
        .parse()
        .map_err(|_| malformed(path, line, &format!("{name} is not a valid integer")))
}

fn malformed(path: &str, line: usize, reason: &str) -> ConfigError {
    ConfigError::Malformed {
        path: path.to_string(),
        line,
        reason: reason.to_string(),
    }
}
