//! Lightweight SQL scanning
//!
//! Only what the candidate generator needs: the tables a statement touches
//! and the identifiers it mentions. The scan is token based and tolerant of
//! aliases, schema qualification, quoting and nested sub-queries.

use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Number,
    Literal,
    Punct(char),
}

const PLAN_CONDITION_LABELS: &[&str] = &[
    "Filter:",
    "Index Cond:",
    "Hash Cond:",
    "Merge Cond:",
    "Join Filter:",
    "Sort Key:",
    "Group Key:",
    "Recheck Cond:",
];

const NOT_A_TABLE: &[&str] = &[
    "select", "lateral", "only", "values", "set", "where", "on", "using", "as", "table",
];

fn tokenize(sql: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '\'' {
            i += 1;
            while i < chars.len() {
                if chars[i] == '\'' {
                    if chars.get(i + 1) == Some(&'\'') {
                        i += 2;
                        continue;
                    }
                    break;
                }
                i += 1;
            }
            i += 1;
            tokens.push(Token::Literal);
        } else if c.is_ascii_digit() {
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Number);
        } else if c.is_alphabetic() || c == '_' || c == '"' {
            let mut ident = String::new();
            while i < chars.len() {
                let c = chars[i];
                if c == '"' {
                    i += 1;
                    while i < chars.len() && chars[i] != '"' {
                        ident.push(chars[i]);
                        i += 1;
                    }
                    i += 1;
                } else if c.is_alphanumeric() || c == '_' || c == '$' || c == '.' {
                    ident.push(c.to_ascii_lowercase());
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(ident));
        } else {
            tokens.push(Token::Punct(c));
            i += 1;
        }
    }
    tokens
}

fn table_name(token: Option<&Token>) -> Option<String> {
    match token {
        Some(Token::Ident(name)) if !NOT_A_TABLE.contains(&name.as_str()) && !name.is_empty() => {
            Some(name.trim_matches('.').to_string())
        }
        _ => None,
    }
}

/// Tables referenced by FROM / JOIN / UPDATE / INTO, in order of first appearance
pub fn parse_tables(sql: &str) -> Vec<String> {
    let tokens = tokenize(sql);
    let mut tables: Vec<String> = Vec::new();
    let push = |name: String, tables: &mut Vec<String>| {
        if !tables.contains(&name) {
            tables.push(name);
        }
    };

    let mut i = 0;
    while i < tokens.len() {
        let keyword = match &tokens[i] {
            Token::Ident(word) => word.as_str(),
            _ => {
                i += 1;
                continue;
            }
        };
        match keyword {
            "from" => {
                // comma separated list: tbl [as] alias, tbl2 ...
                let mut j = i + 1;
                while let Some(name) = table_name(tokens.get(j)) {
                    push(name, &mut tables);
                    j += 1;
                    if matches!(tokens.get(j), Some(Token::Ident(w)) if w == "as") {
                        j += 1;
                    }
                    if matches!(tokens.get(j), Some(Token::Ident(w)) if !is_clause_keyword(w)) {
                        j += 1;
                    }
                    if tokens.get(j) == Some(&Token::Punct(',')) {
                        j += 1;
                    } else {
                        break;
                    }
                }
            }
            "join" | "into" => {
                if let Some(name) = table_name(tokens.get(i + 1)) {
                    push(name, &mut tables);
                }
            }
            "update" => {
                let mut j = i + 1;
                if matches!(tokens.get(j), Some(Token::Ident(w)) if w == "only") {
                    j += 1;
                }
                if let Some(name) = table_name(tokens.get(j)) {
                    push(name, &mut tables);
                }
            }
            _ => {}
        }
        i += 1;
    }
    tables
}

fn is_clause_keyword(word: &str) -> bool {
    matches!(
        word,
        "where"
            | "join"
            | "inner"
            | "left"
            | "right"
            | "full"
            | "cross"
            | "natural"
            | "on"
            | "group"
            | "order"
            | "having"
            | "limit"
            | "offset"
            | "union"
            | "intersect"
            | "except"
            | "for"
            | "returning"
            | "set"
            | "using"
            | "window"
    )
}

/// Every identifier mentioned, reduced to its last dotted segment
pub fn identifiers(sql: &str) -> BTreeSet<String> {
    tokenize(sql)
        .into_iter()
        .filter_map(|token| match token {
            Token::Ident(name) => name.rsplit('.').next().map(str::to_string),
            _ => None,
        })
        .filter(|name| !name.is_empty())
        .collect()
}

/// Identifiers appearing in the condition lines of an `EXPLAIN` plan
pub fn plan_condition_columns<S: AsRef<str>>(plan: &[S]) -> BTreeSet<String> {
    let mut columns = BTreeSet::new();
    for line in plan {
        let line = line.as_ref();
        for label in PLAN_CONDITION_LABELS {
            if let Some(pos) = line.find(label) {
                columns.extend(identifiers(&line[pos + label.len()..]));
            }
        }
    }
    columns
}
