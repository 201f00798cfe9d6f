use std::fmt;

/// A collection of independent failures reported as one error.
///
/// Used wherever one bad item must not hide the outcome of its siblings:
/// skipped routes during matching, failed instances behind a webhook call.
#[derive(Debug)]
pub struct MultiError<E = anyhow::Error> {
    errors: Vec<E>,
}

impl<E> MultiError<E> {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn push(&mut self, err: E) {
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[E] {
        &self.errors
    }

    /// `None` when nothing was collected.
    pub fn into_result(self) -> Option<Self> {
        if self.errors.is_empty() { None } else { Some(self) }
    }
}

impl<E> Default for MultiError<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> FromIterator<E> for MultiError<E> {
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        Self { errors: iter.into_iter().collect() }
    }
}

impl<E: fmt::Display> fmt::Display for MultiError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.errors.len() == 1 { "error" } else { "errors" };
        write!(f, "{} {} occurred:", self.errors.len(), noun)?;
        for err in &self.errors {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

impl<E: fmt::Display + fmt::Debug> std::error::Error for MultiError<E> {}
