use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    pub search: Option<String>,
    pub filters: BTreeMap<String, String>,
}

impl ListQuery {
    pub fn new(limit: u32) -> Self {
        Self {
            page: 1,
            limit,
            search: None,
            filters: BTreeMap::new(),
        }
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    /// Query-string pairs in a stable order.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_string(), self.page.to_string()),
            ("limit".to_string(), self.limit.to_string()),
        ];
        if let Some(search) = self.search.as_deref().filter(|s| !s.trim().is_empty()) {
            pairs.push(("search".to_string(), search.trim().to_string()));
        }
        pairs.extend(
            self.filters
                .iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        pairs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_count: u64,
    pub limit: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T: DeserializeOwned> Page<T> {
    /// Decode a list envelope. Records sit under `data`, `items`, or a
    /// resource-named key such as `customers`; pagination may be absent.
    pub fn from_envelope(body: serde_json::Value, query: &ListQuery) -> Result<Self, ApiError> {
        let mut map = match body {
            serde_json::Value::Object(map) => map,
            array @ serde_json::Value::Array(_) => return Self::from_items(array, query),
            _ => {
                return Err(ApiError::Decode(
                    "list response is not an object".to_string(),
                ))
            }
        };

        let pagination = match map.remove("pagination") {
            Some(raw) => Some(
                serde_json::from_value::<Pagination>(raw)
                    .map_err(|e| ApiError::Decode(format!("pagination: {e}")))?,
            ),
            None => None,
        };

        let key = ["data", "items"]
            .iter()
            .map(|k| k.to_string())
            .find(|k| map.get(k).is_some_and(serde_json::Value::is_array))
            .or_else(|| {
                map.iter()
                    .find(|(_, v)| v.is_array())
                    .map(|(k, _)| k.clone())
            })
            .ok_or_else(|| ApiError::Decode("list response has no record array".to_string()))?;

        let raw_items = map.remove(&key).unwrap_or_default();
        let mut page = Self::from_items(raw_items, query)?;
        if let Some(pagination) = pagination {
            page.pagination = pagination;
        }
        Ok(page)
    }

    fn from_items(raw: serde_json::Value, query: &ListQuery) -> Result<Self, ApiError> {
        let items: Vec<T> =
            serde_json::from_value(raw).map_err(|e| ApiError::Decode(e.to_string()))?;
        let pagination = Pagination {
            current_page: query.page,
            total_pages: query.page,
            total_count: items.len() as u64,
            limit: query.limit,
            has_next: false,
            has_prev: query.page > 1,
        };
        Ok(Self { items, pagination })
    }
}

/// Issued when a fetch starts; only the latest ticket may apply its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket(u64);

/// Filter/pagination state of one list plus the rows last applied to it.
///
/// Responses for superseded queries are dropped instead of overwriting newer
/// results.
#[derive(Debug)]
pub struct ListView<T> {
    query: ListQuery,
    issued: u64,
    rows: Vec<T>,
    pagination: Option<Pagination>,
    exhausted: bool,
}

impl<T> ListView<T> {
    pub fn new(query: ListQuery) -> Self {
        Self {
            query,
            issued: 0,
            rows: Vec::new(),
            pagination: None,
            exhausted: false,
        }
    }

    pub fn query(&self) -> &ListQuery {
        &self.query
    }

    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    pub fn pagination(&self) -> Option<&Pagination> {
        self.pagination.as_ref()
    }

    /// Change filters; pagination resets to the first page.
    pub fn set_filters(&mut self, search: Option<String>, filters: BTreeMap<String, String>) {
        self.query.search = search;
        self.query.filters = filters;
        self.query.page = 1;
        self.pagination = None;
        self.exhausted = false;
    }

    pub fn go_to_page(&mut self, page: u32) {
        self.query.page = page.max(1);
    }

    /// Advance past the page last requested. Stops when the server says there
    /// is nothing more, returns an empty page, stops advancing its own page
    /// counter, or `totalPages` has been reached.
    pub fn next_page(&mut self) -> bool {
        let pagination = match &self.pagination {
            Some(p) => p,
            None => return false,
        };
        if self.exhausted || !pagination.has_next {
            return false;
        }
        if pagination.total_pages > 0 && self.query.page >= pagination.total_pages {
            return false;
        }
        match self.query.page.checked_add(1) {
            Some(next) => {
                self.query.page = next;
                true
            }
            None => false,
        }
    }

    pub fn begin_fetch(&mut self) -> (FetchTicket, ListQuery) {
        self.issued += 1;
        (FetchTicket(self.issued), self.query.clone())
    }

    /// Apply a finished fetch; returns false when a newer fetch was issued.
    pub fn apply(&mut self, ticket: FetchTicket, page: Page<T>) -> bool {
        if ticket.0 != self.issued {
            tracing::debug!(
                ticket = ticket.0,
                latest = self.issued,
                "dropping stale list response"
            );
            return false;
        }
        self.exhausted = page.items.is_empty();
        self.rows = page.items;
        self.pagination = Some(page.pagination);
        true
    }

    /// Append instead of replace, for walking every page.
    pub fn append(&mut self, ticket: FetchTicket, page: Page<T>) -> bool {
        if ticket.0 != self.issued {
            return false;
        }
        let advanced = self
            .pagination
            .as_ref()
            .map_or(true, |prev| page.pagination.current_page > prev.current_page);
        if !advanced {
            tracing::warn!(
                requested = self.query.page,
                reported = page.pagination.current_page,
                "server repeated a page; stopping pagination"
            );
        }
        self.exhausted = !advanced || page.items.is_empty();
        if advanced {
            self.rows.extend(page.items);
        }
        self.pagination = Some(page.pagination);
        true
    }

    pub fn into_rows(self) -> Vec<T> {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        id: u32,
    }

    fn page(ids: &[u32], has_next: bool, current: u32) -> Page<Row> {
        Page {
            items: ids.iter().map(|&id| Row { id }).collect(),
            pagination: Pagination {
                current_page: current,
                total_pages: 2,
                total_count: 4,
                limit: 2,
                has_next,
                has_prev: current > 1,
            },
        }
    }

    #[test]
    fn decodes_data_items_and_named_envelopes() {
        let q = ListQuery::new(10);
        let body = json!({
            "data": [{"id": 1}],
            "pagination": {"currentPage": 1, "totalPages": 3, "totalCount": 21,
                           "limit": 10, "hasNext": true, "hasPrev": false}
        });
        let p: Page<Row> = Page::from_envelope(body, &q).unwrap();
        assert_eq!(p.items, vec![Row { id: 1 }]);
        assert_eq!(p.pagination.total_count, 21);
        assert!(p.pagination.has_next);

        let p: Page<Row> = Page::from_envelope(json!({"items": [{"id": 2}]}), &q).unwrap();
        assert_eq!(p.items, vec![Row { id: 2 }]);
        assert_eq!(p.pagination.total_count, 1);

        let p: Page<Row> =
            Page::from_envelope(json!({"customers": [{"id": 3}], "ok": true}), &q).unwrap();
        assert_eq!(p.items, vec![Row { id: 3 }]);

        let p: Page<Row> = Page::from_envelope(json!([{"id": 4}]), &q).unwrap();
        assert_eq!(p.items.len(), 1);
    }

    #[test]
    fn rejects_envelopes_without_records() {
        let q = ListQuery::new(10);
        let err = Page::<Row>::from_envelope(json!({"error": "x"}), &q).unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn query_pairs_skip_blank_values() {
        let mut q = ListQuery::new(20)
            .filter("stage", "Nova")
            .filter("customerId", "");
        q.search = Some("  silva ".to_string());
        let pairs = q.to_pairs();
        assert!(pairs.contains(&("search".to_string(), "silva".to_string())));
        assert!(pairs.contains(&("stage".to_string(), "Nova".to_string())));
        assert!(!pairs.iter().any(|(k, _)| k == "customerId"));
    }

    #[test]
    fn stale_responses_do_not_overwrite_newer_ones() {
        let mut view = ListView::new(ListQuery::new(2));
        let (slow, _) = view.begin_fetch();
        view.set_filters(Some("souza".to_string()), BTreeMap::new());
        let (fresh, query) = view.begin_fetch();
        assert_eq!(query.search.as_deref(), Some("souza"));

        assert!(view.apply(fresh, page(&[7], false, 1)));
        assert!(!view.apply(slow, page(&[1, 2], true, 1)));
        assert_eq!(view.rows(), &[Row { id: 7 }]);
    }

    #[test]
    fn filter_change_resets_page() {
        let mut view: ListView<Row> = ListView::new(ListQuery::new(2));
        view.go_to_page(4);
        view.set_filters(None, BTreeMap::from([("stage".to_string(), "Ganha".to_string())]));
        assert_eq!(view.query().page, 1);
    }

    #[test]
    fn walks_pages_by_appending() {
        let mut view = ListView::new(ListQuery::new(2));
        let (t1, _) = view.begin_fetch();
        assert!(view.append(t1, page(&[1, 2], true, 1)));
        assert!(view.next_page());
        let (t2, q2) = view.begin_fetch();
        assert_eq!(q2.page, 2);
        assert!(view.append(t2, page(&[3, 4], false, 2)));
        assert!(!view.next_page());
        assert_eq!(view.into_rows().len(), 4);
    }

    #[test]
    fn stops_when_server_page_does_not_advance() {
        let mut view = ListView::new(ListQuery::new(2));
        let (t1, _) = view.begin_fetch();
        view.append(t1, page(&[1, 2], true, 0));
        assert!(view.next_page());
        let (t2, q2) = view.begin_fetch();
        assert_eq!(q2.page, 2);
        view.append(t2, page(&[1, 2], true, 0));
        assert!(!view.next_page());
        assert_eq!(view.rows(), &[Row { id: 1 }, Row { id: 2 }]);
    }

    #[test]
    fn stops_on_empty_page_or_total_pages() {
        let mut view = ListView::new(ListQuery::new(2));
        let (t1, _) = view.begin_fetch();
        view.append(t1, page(&[], true, 1));
        assert!(!view.next_page());

        let mut view = ListView::new(ListQuery::new(2));
        view.go_to_page(2);
        let (t, _) = view.begin_fetch();
        // Claims another page exists although totalPages is 2.
        view.append(t, page(&[3], true, 2));
        assert!(!view.next_page());
    }

    #[test]
    fn page_counter_never_overflows() {
        let mut view = ListView::new(ListQuery::new(2));
        view.go_to_page(u32::MAX);
        let (t, _) = view.begin_fetch();
        let mut last = page(&[9], true, u32::MAX);
        last.pagination.total_pages = 0;
        view.append(t, last);
        assert!(!view.next_page());
        assert_eq!(view.query().page, u32::MAX);
    }

    #[test]
    fn sparse_pagination_blocks_decode_with_defaults() {
        let q = ListQuery::new(10);
        let body = json!({"data": [{"id": 1}], "pagination": {"currentPage": 0, "hasNext": true}});
        let p: Page<Row> = Page::from_envelope(body, &q).unwrap();
        assert_eq!(p.pagination.current_page, 0);
        assert_eq!(p.pagination.total_pages, 0);
        assert!(p.pagination.has_next);
    }
}
