// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::TemplateError;
use std::fmt;

/// A command string with `%N` positional placeholders (1-based).
///
/// `"--file %1 --exclude %2 --with %1"` takes two arguments; a repeated
/// placeholder repeats its argument. A `%` not followed by digits is literal
/// text. `\%` and `\\` escape a percent sign and a backslash; any other
/// backslash is literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalTemplate {
    /// Literal text around the placeholders; always `indices.len() + 1` long.
    segments: Vec<String>,
    /// Placeholder indices in order of appearance.
    indices: Vec<usize>,
    arg_count: usize,
}

impl SignalTemplate {
    pub fn parse(format: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut indices = Vec::new();
        let mut current = String::new();
        let mut chars = format.char_indices().peekable();

        while let Some((position, c)) = chars.next() {
            match c {
                '\\' => match chars.peek() {
                    Some(&(_, escaped @ ('%' | '\\'))) => {
                        chars.next();
                        current.push(escaped);
                    }
                    _ => current.push(c),
                },
                '%' => {
                    let mut digits = String::new();
                    while let Some(&(_, d)) = chars.peek() {
                        if !d.is_ascii_digit() {
                            break;
                        }
                        digits.push(d);
                        chars.next();
                    }
                    if digits.is_empty() {
                        current.push('%');
                        continue;
                    }
                    let index: usize = digits
                        .parse()
                        .map_err(|_| TemplateError::IndexOverflow { position })?;
                    if index == 0 {
                        return Err(TemplateError::ZeroIndex { position });
                    }
                    segments.push(std::mem::take(&mut current));
                    indices.push(index);
                }
                _ => current.push(c),
            }
        }
        segments.push(current);

        let arg_count = indices.iter().copied().max().unwrap_or(0);
        Ok(Self {
            segments,
            indices,
            arg_count,
        })
    }

    /// Highest placeholder index, i.e. the minimum number of arguments `render` needs.
    pub fn arg_count(&self) -> usize {
        self.arg_count
    }

    pub fn render<S: AsRef<str>>(&self, args: &[S]) -> Result<String, TemplateError> {
        if args.len() < self.arg_count {
            return Err(TemplateError::TooFewArguments {
                needed: self.arg_count,
                given: args.len(),
            });
        }

        let mut out = String::new();
        for (segment, &index) in self.segments.iter().zip(&self.indices) {
            out.push_str(segment);
            // Bounds hold: index is in 1..=arg_count and args.len() >= arg_count.
            if let Some(arg) = args.get(index - 1) {
                out.push_str(arg.as_ref());
            }
        }
        if let Some(trailing) = self.segments.last() {
            out.push_str(trailing);
        }
        Ok(out)
    }
}

fn escape(segment: &str) -> String {
    segment.replace('\\', "\\\\").replace('%', "\\%")
}

/// Prints the template in a form `parse` reads back unchanged.
impl fmt::Display for SignalTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (segment, index) in self.segments.iter().zip(&self.indices) {
            write!(f, "{}%{index}", escape(segment))?;
        }
        match self.segments.last() {
            Some(trailing) => f.write_str(&escape(trailing)),
            None => Ok(()),
        }
    }
}
