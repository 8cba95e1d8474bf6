//! Continuation-token pagination.
//!
//! Object listings and job-queue queries both hand out results one page at a
//! time along with an opaque token for the next page. [`Paginated`] turns a
//! page-fetching closure into a lazy iterator that follows tokens until the
//! source reports no further page. It cannot be restarted; callers collect it
//! fully before acting on the results.

/// One page of results plus the token for the following page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `None` when this is the final page.
    pub next: Option<String>,
}

impl<T> Page<T> {
    /// The final page of a listing.
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }

    /// A page followed by another, reachable through `next`.
    pub fn with_next(items: Vec<T>, next: impl Into<String>) -> Self {
        Self {
            items,
            next: Some(next.into()),
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.next.is_some()
    }
}

#[derive(Debug)]
enum Cursor {
    Start,
    Continue(String),
    Exhausted,
}

/// Lazy iterator over every item of a paginated source.
///
/// The first error ends iteration.
pub struct Paginated<T, E, F>
where
    F: FnMut(Option<&str>) -> Result<Page<T>, E>,
{
    fetch: F,
    buffered: std::vec::IntoIter<T>,
    cursor: Cursor,
}

/// Build a [`Paginated`] iterator from a page-fetching closure.
///
/// The closure receives `None` for the first page and the previous page's
/// `next` token afterwards.
pub fn paginate<T, E, F>(fetch: F) -> Paginated<T, E, F>
where
    F: FnMut(Option<&str>) -> Result<Page<T>, E>,
{
    Paginated {
        fetch,
        buffered: Vec::new().into_iter(),
        cursor: Cursor::Start,
    }
}

impl<T, E, F> Iterator for Paginated<T, E, F>
where
    F: FnMut(Option<&str>) -> Result<Page<T>, E>,
{
    type Item = Result<T, E>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffered.next() {
                return Some(Ok(item));
            }

            let token = match std::mem::replace(&mut self.cursor, Cursor::Exhausted) {
                Cursor::Exhausted => return None,
                Cursor::Start => None,
                Cursor::Continue(token) => Some(token),
            };

            match (self.fetch)(token.as_deref()) {
                Ok(page) => {
                    self.buffered = page.items.into_iter();
                    if let Some(next) = page.next {
                        self.cursor = Cursor::Continue(next);
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
