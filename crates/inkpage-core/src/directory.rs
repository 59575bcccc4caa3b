//! Page identity, provided by the host application.

use crate::stroke::PageId;

/// Which pages exist and which one the user is looking at.
pub trait PageDirectory {
    fn current_page(&self) -> Option<PageId>;

    fn pages(&self) -> Vec<PageId>;
}

/// Fixed page list, for tests and simple hosts.
#[derive(Debug, Clone, Default)]
pub struct StaticPages {
    pages: Vec<PageId>,
    current: Option<usize>,
}

impl StaticPages {
    pub fn new(pages: impl IntoIterator<Item = PageId>) -> Self {
        let pages: Vec<_> = pages.into_iter().collect();
        let current = if pages.is_empty() { None } else { Some(0) };
        Self { pages, current }
    }

    /// Make `page_id` current. Returns false if it is not in the list.
    pub fn select(&mut self, page_id: &PageId) -> bool {
        match self.pages.iter().position(|p| p == page_id) {
            Some(index) => {
                self.current = Some(index);
                true
            }
            None => false,
        }
    }
}

impl PageDirectory for StaticPages {
    fn current_page(&self) -> Option<PageId> {
        self.current.and_then(|i| self.pages.get(i).cloned())
    }

    fn pages(&self) -> Vec<PageId> {
        self.pages.clone()
    }
}
