use crate::types::OutputValues;

/// One page of mapped rows plus the paging arithmetic derived from the total
/// record count.
#[derive(Debug, Clone, PartialEq)]
pub struct PagedResult<T> {
    data: Vec<T>,
    page_number: i32,
    page_size: i32,
    total_records: i64,
    total_pages: i64,
    has_next_page: bool,
    has_previous_page: bool,
}

impl<T> PagedResult<T> {
    /// Computes total pages as `ceil(total_records / page_size)` and derives
    /// the next/previous flags.
    ///
    /// `page_size` must be positive; a non-positive size yields zero pages.
    pub fn new(data: Vec<T>, page_number: i32, page_size: i32, total_records: i64) -> Self {
        let total_records = total_records.max(0);
        let total_pages = if page_size > 0 {
            let size = i64::from(page_size);
            total_records / size + i64::from(total_records % size != 0)
        } else {
            0
        };
        Self {
            data,
            page_number,
            page_size,
            total_records,
            total_pages,
            has_next_page: i64::from(page_number) < total_pages,
            has_previous_page: page_number > 1,
        }
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    pub fn page_number(&self) -> i32 {
        self.page_number
    }

    pub fn page_size(&self) -> i32 {
        self.page_size
    }

    pub fn total_records(&self) -> i64 {
        self.total_records
    }

    pub fn total_pages(&self) -> i64 {
        self.total_pages
    }

    pub fn has_next_page(&self) -> bool {
        self.has_next_page
    }

    pub fn has_previous_page(&self) -> bool {
        self.has_previous_page
    }
}

/// Mapped rows of a stored procedure call together with its output
/// parameter values.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputResult<T> {
    pub data: Vec<T>,
    pub output_values: OutputValues,
}
