// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Error types for sketch operations.

use std::fmt;

/// ErrorKind is all kinds of Error produced by this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A parameter is outside its documented range.
    InvalidArgument,
    /// Serialized data is structurally malformed.
    Format,
    /// The serial version is not supported by this implementation.
    Version,
    /// The family id does not match the sketch being deserialized.
    FamilyMismatch,
    /// The seed hash of the data does not match the caller's seed.
    IncompatibleSeed,
    /// A read or write fell short at the reader/writer boundary.
    Io,
}

impl ErrorKind {
    /// Convert this error kind instance into static str.
    pub const fn into_static(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::Format => "FormatError",
            ErrorKind::Version => "VersionError",
            ErrorKind::FamilyMismatch => "FamilyMismatch",
            ErrorKind::IncompatibleSeed => "IncompatibleSeed",
            ErrorKind::Io => "IoError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.into_static())
    }
}

/// Error is the error struct returned by all sketch operations.
pub struct Error {
    kind: ErrorKind,
    message: String,
    context: Vec<(&'static str, String)>,
    source: Option<anyhow::Error>,
}

impl Error {
    /// Create a new Error with error kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Vec::default(),
            source: None,
        }
    }

    /// Add more context in error.
    pub fn with_context(mut self, key: &'static str, value: impl ToString) -> Self {
        self.context.push((key, value.to_string()));
        self
    }

    /// Set source for error.
    ///
    /// # Panics
    ///
    /// Panics if the source has been set.
    pub fn set_source(mut self, src: impl Into<anyhow::Error>) -> Self {
        assert!(self.source.is_none(), "the source error has been set");
        self.source = Some(src.into());
        self
    }

    /// Return error's kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Return error's message.
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub(crate) fn format(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Format, message)
    }

    pub(crate) fn version(expected: u8, actual: u8) -> Self {
        Self::new(ErrorKind::Version, "unsupported serial version")
            .with_context("expected", expected)
            .with_context("actual", actual)
    }

    pub(crate) fn family_mismatch(expected: u8, actual: u8, name: &'static str) -> Self {
        Self::new(ErrorKind::FamilyMismatch, "family id mismatch")
            .with_context("family", name)
            .with_context("expected", expected)
            .with_context("actual", actual)
    }

    pub(crate) fn incompatible_seed(expected: u16, actual: u16) -> Self {
        Self::new(ErrorKind::IncompatibleSeed, "seed hashes do not match")
            .with_context("expected", format!("{expected:#06x}"))
            .with_context("actual", format!("{actual:#06x}"))
    }

    pub(crate) fn insufficient_data(field: &'static str) -> Self {
        Self::new(ErrorKind::Io, "input ended before the field was read")
            .with_context("field", field)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // If alternate has been specified, we will print like Debug.
        if f.alternate() {
            let mut de = f.debug_struct("Error");
            de.field("kind", &self.kind);
            de.field("message", &self.message);
            de.field("context", &self.context);
            de.field("source", &self.source);
            return de.finish();
        }

        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        writeln!(f)?;

        if !self.context.is_empty() {
            writeln!(f)?;
            writeln!(f, "Context:")?;
            for (k, v) in self.context.iter() {
                writeln!(f, "   {k}: {v}")?;
            }
        }

        if let Some(source) = &self.source {
            writeln!(f)?;
            writeln!(f, "Source:")?;
            writeln!(f, "   {source:#}")?;
        }

        Ok(())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if !self.context.is_empty() {
            write!(f, ", context: {{ ")?;
            write!(
                f,
                "{}",
                self.context
                    .iter()
                    .map(|(k, v)| format!("{k}: {v}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )?;
            write!(f, " }}")?;
        }

        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }

        if let Some(source) = &self.source {
            write!(f, ", source: {source}")?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|v| v.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_context() {
        let err = Error::new(ErrorKind::Format, "bad preamble")
            .with_context("expected", 2)
            .with_context("actual", 5);
        let rendered = format!("{err}");
        assert!(rendered.contains("FormatError"));
        assert!(rendered.contains("expected: 2"));
        assert!(rendered.contains("bad preamble"));
    }

    #[test]
    fn test_source_is_chained() {
        use std::error::Error as _;
        let err = Error::new(ErrorKind::Io, "short read")
            .set_source(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
        assert!(err.source().is_some());
    }
}
