// Paged result - a stateful, navigable view over a list of entries.
//
// Owns the page arithmetic and rendering; delivery and interaction wiring
// live in the session manager. No Discord dependencies here.

use std::time::Duration;

pub type DisplayFn<T> = Box<dyn Fn(&T) -> String + Send + Sync>;
pub type RenderFn<T> = Box<dyn Fn(&PageView<'_, T>) -> String + Send + Sync>;
pub type MatchFn<T> = Box<dyn Fn(&T, &str) -> bool + Send + Sync>;
pub type SelectFn<T> = Box<dyn FnOnce(Selected<T>) + Send>;
pub type TimeoutFn = Box<dyn FnOnce() + Send>;

/// Paging state handed to a custom renderer.
pub struct PageView<'a, T> {
    pub entries: &'a [T],
    pub page: usize,
    pub max_page: usize,
    pub per_page: usize,
}

/// A confirmed selection: the page it happened on, the entry's 1-based
/// global index, and the entry itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Selected<T> {
    pub page: usize,
    pub index: usize,
    pub item: T,
}

/// Navigation button state for the current page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavControls {
    pub previous_enabled: bool,
    pub next_enabled: bool,
}

/// A renderable snapshot of the current page. `controls` is absent when the
/// whole list fits on one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PagePayload {
    pub content: String,
    pub controls: Option<NavControls>,
}

pub struct PagedResult<T> {
    entries: Vec<T>,
    display: DisplayFn<T>,
    renderer: Option<RenderFn<T>>,
    select_matcher: Option<MatchFn<T>>,
    per_page: usize,
    page: usize,
    indexed: bool,
    page_overflow: bool,
    auto_select: bool,
    selectable: bool,
    timeout: Duration,
    on_select: Option<SelectFn<T>>,
    on_timeout: Option<TimeoutFn>,
}

impl<T> PagedResult<T> {
    pub fn new(entries: Vec<T>, display: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        Self {
            entries,
            display: Box::new(display),
            renderer: None,
            select_matcher: None,
            per_page: 10,
            page: 1,
            indexed: true,
            page_overflow: true,
            auto_select: false,
            selectable: false,
            timeout: Duration::from_secs(60),
            on_select: None,
            on_timeout: None,
        }
    }

    /// Entries per page; floors at 1.
    pub fn per_page(mut self, per_page: usize) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    /// Prefix each entry with its 1-based global index.
    pub fn indexed(mut self, indexed: bool) -> Self {
        self.indexed = indexed;
        self
    }

    /// Wrap navigation past the last page back to the first (and vice
    /// versa). When disabled navigation clamps and the edge button disables.
    pub fn page_overflow(mut self, overflow: bool) -> Self {
        self.page_overflow = overflow;
        self
    }

    /// Skip the whole UI when the list has exactly one entry.
    pub fn auto_select(mut self, auto_select: bool) -> Self {
        self.auto_select = auto_select;
        self
    }

    /// Allow the owner to pick an entry by index or display text.
    pub fn selectable(mut self, selectable: bool) -> Self {
        self.selectable = selectable;
        self
    }

    /// Replace the default list view with a renderer given the full paging
    /// state. Navigation controls are still attached the usual way.
    pub fn renderer(
        mut self,
        renderer: impl Fn(&PageView<'_, T>) -> String + Send + Sync + 'static,
    ) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    /// Match typed selection input with a predicate instead of comparing it
    /// against each entry's display text. Numeric index input still works.
    pub fn select_with(
        mut self,
        matcher: impl Fn(&T, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.select_matcher = Some(Box::new(matcher));
        self.selectable = true;
        self
    }

    /// Inactivity window before the session closes itself. Each handled
    /// event starts a fresh window.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn on_select(mut self, callback: impl FnOnce(Selected<T>) + Send + 'static) -> Self {
        self.on_select = Some(Box::new(callback));
        self
    }

    pub fn on_timeout(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_timeout = Some(Box::new(callback));
        self
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn inactivity_window(&self) -> Duration {
        self.timeout
    }

    pub fn is_auto_select(&self) -> bool {
        self.auto_select
    }

    /// Always at least 1; an empty list still renders page 1/1.
    pub fn max_page(&self) -> usize {
        (self.entries.len().div_ceil(self.per_page)).max(1)
    }

    pub fn next_page(&mut self) {
        let max = self.max_page();
        self.page = if self.page_overflow {
            self.page % max + 1
        } else {
            (self.page + 1).min(max)
        };
    }

    /// Jump straight to a page, clamped into `1..=max_page`.
    pub fn set_page(&mut self, page: usize) {
        self.page = page.clamp(1, self.max_page());
    }

    pub fn previous_page(&mut self) {
        self.page = if self.page_overflow {
            if self.page == 1 {
                self.max_page()
            } else {
                self.page - 1
            }
        } else {
            (self.page - 1).max(1)
        };
    }

    pub fn render(&self) -> PagePayload {
        let max_page = self.max_page();
        let start = (self.page - 1) * self.per_page;

        let content = if let Some(renderer) = &self.renderer {
            renderer(&PageView {
                entries: &self.entries,
                page: self.page,
                max_page,
                per_page: self.per_page,
            })
        } else {
            let mut content = format!("Page **{}/{}**\n\n", self.page, max_page);
            for (offset, entry) in self.entries.iter().skip(start).take(self.per_page).enumerate() {
                if self.indexed {
                    content.push_str(&format!("{}. ", start + offset + 1));
                }
                content.push_str(&(self.display)(entry));
                content.push('\n');
            }
            content
        };

        let controls = if self.entries.len() > self.per_page {
            Some(NavControls {
                previous_enabled: self.page_overflow || self.page > 1,
                next_enabled: self.page_overflow || self.page < max_page,
            })
        } else {
            None
        };

        PagePayload { content, controls }
    }

    /// Resolve the owner's typed input against the current page: a number is
    /// a 1-based global index bounded to the visible page, anything else is
    /// matched against visible entries by the configured predicate or, by
    /// default, exact display text. `None` means no selection happened
    /// (wrong page, unknown text, or not selectable).
    pub fn select(&self, input: &str) -> Option<Selected<T>>
    where
        T: Clone,
    {
        if !self.selectable {
            return None;
        }

        let start = (self.page - 1) * self.per_page;
        let end = (start + self.per_page).min(self.entries.len());
        let input = input.trim();

        if let Ok(number) = input.parse::<usize>() {
            if number > start && number <= end {
                return Some(Selected {
                    page: self.page,
                    index: number,
                    item: self.entries[number - 1].clone(),
                });
            }
            return None;
        }

        self.entries[start..end]
            .iter()
            .enumerate()
            .find(|(_, entry)| match &self.select_matcher {
                Some(matcher) => matcher(entry, input),
                None => (self.display)(entry) == input,
            })
            .map(|(offset, entry)| Selected {
                page: self.page,
                index: start + offset + 1,
                item: entry.clone(),
            })
    }

    pub(crate) fn take_on_select(&mut self) -> Option<SelectFn<T>> {
        self.on_select.take()
    }

    pub(crate) fn take_on_timeout(&mut self) -> Option<TimeoutFn> {
        self.on_timeout.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(count: usize) -> PagedResult<usize> {
        PagedResult::new((1..=count).collect(), |n| format!("entry {n}"))
    }

    #[test]
    fn max_page_rounds_up_and_floors_at_one() {
        assert_eq!(numbers(25).max_page(), 3);
        assert_eq!(numbers(20).max_page(), 2);
        assert_eq!(numbers(3).max_page(), 1);
        assert_eq!(numbers(0).max_page(), 1);
    }

    #[test]
    fn overflow_navigation_wraps_both_directions() {
        let mut paged = numbers(25);
        paged.previous_page();
        assert_eq!(paged.page(), 3);
        paged.next_page();
        assert_eq!(paged.page(), 1);
        paged.next_page();
        paged.next_page();
        paged.next_page();
        assert_eq!(paged.page(), 1);
    }

    #[test]
    fn clamped_navigation_stops_at_edges() {
        let mut paged = numbers(25).page_overflow(false);
        paged.previous_page();
        assert_eq!(paged.page(), 1);

        paged.next_page();
        paged.next_page();
        paged.next_page();
        paged.next_page();
        assert_eq!(paged.page(), 3);
    }

    #[test]
    fn render_numbers_entries_globally() {
        let mut paged = numbers(25);
        paged.next_page();

        let payload = paged.render();
        assert!(payload.content.starts_with("Page **2/3**"));
        assert!(payload.content.contains("11. entry 11"));
        assert!(payload.content.contains("20. entry 20"));
        assert!(!payload.content.contains("21. "));
    }

    #[test]
    fn unindexed_render_has_no_prefixes() {
        let paged = numbers(2).indexed(false);
        let payload = paged.render();
        assert!(payload.content.contains("entry 1\n"));
        assert!(!payload.content.contains("1. "));
    }

    #[test]
    fn controls_absent_when_single_page() {
        assert!(numbers(10).render().controls.is_none());
        assert!(numbers(11).render().controls.is_some());
    }

    #[test]
    fn clamped_controls_disable_at_edges() {
        let mut paged = numbers(25).page_overflow(false);
        let controls = paged.render().controls.unwrap();
        assert!(!controls.previous_enabled);
        assert!(controls.next_enabled);

        paged.next_page();
        paged.next_page();
        let controls = paged.render().controls.unwrap();
        assert!(controls.previous_enabled);
        assert!(!controls.next_enabled);
    }

    #[test]
    fn wrapping_controls_are_always_enabled() {
        let controls = numbers(25).render().controls.unwrap();
        assert!(controls.previous_enabled);
        assert!(controls.next_enabled);
    }

    #[test]
    fn selects_by_visible_index_only() {
        let mut paged = numbers(25).selectable(true);
        paged.next_page();

        let selected = paged.select("12").unwrap();
        assert_eq!(selected.item, 12);
        assert_eq!(selected.index, 12);
        assert_eq!(selected.page, 2);

        // Index from another page does not select
        assert!(paged.select("3").is_none());
        assert!(paged.select("21").is_none());
    }

    #[test]
    fn selects_by_display_text_on_current_page() {
        let mut paged = numbers(25).selectable(true);
        paged.next_page();

        assert_eq!(paged.select("entry 15").unwrap().item, 15);
        assert!(paged.select("entry 3").is_none());
        assert!(paged.select("no such entry").is_none());
    }

    #[test]
    fn set_page_clamps_to_valid_range() {
        let mut paged = numbers(25);
        paged.set_page(3);
        assert_eq!(paged.page(), 3);
        paged.set_page(9);
        assert_eq!(paged.page(), 3);
        paged.set_page(0);
        assert_eq!(paged.page(), 1);
    }

    #[test]
    fn custom_renderer_replaces_the_list_view() {
        let mut paged = numbers(25).renderer(|view| {
            format!(
                "{} entries, showing page {} of {}",
                view.entries.len(),
                view.page,
                view.max_page
            )
        });
        paged.next_page();

        let payload = paged.render();
        assert_eq!(payload.content, "25 entries, showing page 2 of 3");
        assert!(payload.controls.is_some());
    }

    #[test]
    fn predicate_selection_overrides_display_text() {
        let paged = numbers(5).select_with(|entry, input| {
            input.strip_prefix('#').and_then(|n| n.parse().ok()) == Some(*entry)
        });

        let selected = paged.select("#4").unwrap();
        assert_eq!(selected.item, 4);
        assert_eq!(selected.index, 4);
        assert!(paged.select("entry 4").is_none());
    }

    #[test]
    fn unselectable_list_ignores_input() {
        let paged = numbers(5);
        assert!(paged.select("1").is_none());
        assert!(paged.select("entry 1").is_none());
    }
}
