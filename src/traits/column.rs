/// Something that can address a column of a row: a zero-based ordinal or a
/// column name.
///
/// Names match exactly first, then ASCII case-insensitively.
pub trait ColumnIndex {
    /// Resolves this index against the row's column names.
    fn position(&self, columns: &[String]) -> Option<usize>;

    /// Human-readable form used in error messages.
    fn describe(&self) -> String;
}

impl ColumnIndex for usize {
    fn position(&self, columns: &[String]) -> Option<usize> {
        (*self < columns.len()).then_some(*self)
    }

    fn describe(&self) -> String {
        format!("#{}", self)
    }
}

// Unsuffixed integer literals default to i32, so `row.get(0)` lands here.
impl ColumnIndex for i32 {
    fn position(&self, columns: &[String]) -> Option<usize> {
        usize::try_from(*self).ok()?.position(columns)
    }

    fn describe(&self) -> String {
        format!("#{}", self)
    }
}

impl ColumnIndex for str {
    fn position(&self, columns: &[String]) -> Option<usize> {
        columns
            .iter()
            .position(|c| c == self)
            .or_else(|| columns.iter().position(|c| c.eq_ignore_ascii_case(self)))
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

impl ColumnIndex for String {
    fn position(&self, columns: &[String]) -> Option<usize> {
        self.as_str().position(columns)
    }

    fn describe(&self) -> String {
        self.clone()
    }
}

impl<T: ColumnIndex + ?Sized> ColumnIndex for &T {
    fn position(&self, columns: &[String]) -> Option<usize> {
        (**self).position(columns)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
