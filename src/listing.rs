//! Client-side filtering and fixed-size pagination over a fetched record set.

/// Anything with a name a search term can match against.
pub trait Named {
    fn display_name(&self) -> &str;
}

/// Records whose display name contains `term`, ignoring case, in their
/// original order. An empty term keeps everything.
pub fn filter<'a, T: Named>(records: &'a [T], term: &str) -> Vec<&'a T> {
    let needle = term.to_lowercase();
    records
        .iter()
        .filter(|r| needle.is_empty() || r.display_name().to_lowercase().contains(&needle))
        .collect()
}

pub fn page_count(len: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    len.div_ceil(page_size)
}

/// 1-based page `page` of `records`. Pages outside `1..=page_count` are empty.
pub fn paginate<T>(records: &[T], page_size: usize, page: usize) -> &[T] {
    if page == 0 || page_size == 0 {
        return &[];
    }
    let start = (page - 1).saturating_mul(page_size);
    if start >= records.len() {
        return &[];
    }
    let end = start.saturating_add(page_size).min(records.len());
    &records[start..end]
}

/// Search term and current page over one fetched list.
#[derive(Debug, Clone)]
pub struct ListState<T> {
    records: Vec<T>,
    term: String,
    page: usize,
    page_size: usize,
}

impl<T: Named> ListState<T> {
    pub fn new(records: Vec<T>, page_size: usize) -> Self {
        Self {
            records,
            term: String::new(),
            page: 1,
            page_size,
        }
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    /// A different term always sends the view back to page 1.
    pub fn set_term(&mut self, term: &str) {
        if term != self.term {
            self.term = term.to_string();
            self.page = 1;
        }
    }

    pub fn go_to(&mut self, page: usize) {
        self.page = page.max(1);
    }

    pub fn filtered(&self) -> Vec<&T> {
        filter(&self.records, &self.term)
    }

    pub fn filtered_len(&self) -> usize {
        self.filtered().len()
    }

    pub fn page_count(&self) -> usize {
        page_count(self.filtered_len(), self.page_size)
    }

    pub fn visible(&self) -> Vec<&T> {
        let filtered = self.filtered();
        paginate(&filtered, self.page_size, self.page).to_vec()
    }

    /// Pagination controls only make sense past a single page.
    pub fn needs_pagination(&self) -> bool {
        self.filtered_len() > self.page_size
    }

    pub fn find(&self, pred: impl Fn(&T) -> bool) -> Option<&T> {
        self.records.iter().find(|r| pred(r))
    }

    /// Drop matching records from the local copy. Returns how many went.
    pub fn remove_where(&mut self, pred: impl Fn(&T) -> bool) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !pred(r));
        before - self.records.len()
    }
}
