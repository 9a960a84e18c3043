//! Error aggregation
//!
//! Reconciliation keeps going after a per-object or per-addon failure and
//! reports everything that went wrong at once.

use std::fmt;

/// A non-empty list of errors reported together
#[derive(Debug)]
pub struct AggregateError<E> {
    errors: Vec<E>,
}

impl<E> AggregateError<E> {
    /// `None` when there is nothing to report
    pub fn new(errors: Vec<E>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    /// `Ok(())` for an empty list, the aggregate otherwise
    pub fn check(errors: Vec<E>) -> Result<(), Self> {
        match Self::new(errors) {
            None => Ok(()),
            Some(aggregate) => Err(aggregate),
        }
    }

    pub fn errors(&self) -> &[E] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<E> {
        self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Never true for a constructed aggregate
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl<E: fmt::Display> fmt::Display for AggregateError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [single] = self.errors.as_slice() {
            return write!(f, "{}", single);
        }
        write!(f, "{} errors occurred:", self.errors.len())?;
        for (index, error) in self.errors.iter().enumerate() {
            write!(f, "\n  {}. {}", index + 1, error)?;
        }
        Ok(())
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for AggregateError<E> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_ok() {
        assert!(AggregateError::<String>::new(Vec::new()).is_none());
        assert!(AggregateError::<String>::check(Vec::new()).is_ok());
    }

    #[test]
    fn test_single_error_displays_plainly() {
        let err = AggregateError::check(vec!["boom".to_string()]).unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.len(), 1);
    }

    #[test]
    fn test_numbered_list() {
        let err = AggregateError::check(vec!["first", "second"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "2 errors occurred:\n  1. first\n  2. second"
        );
        assert_eq!(err.into_errors(), vec!["first", "second"]);
    }
}
