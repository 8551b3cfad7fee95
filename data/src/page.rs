// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: u64 = 20;
pub const MESSAGE_PAGE_LIMIT: u64 = 50;
const MAX_PAGE_LIMIT: u64 = 100;

/// A 1-based page request. Out-of-range values are clamped rather than
/// rejected.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl PageRequest {
    pub fn normalize(self, default_limit: u64) -> (u64, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self
            .limit
            .unwrap_or(default_limit)
            .clamp(1, MAX_PAGE_LIMIT);
        (page, limit)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u64,
    pub total_pages: u64,
    pub total_count: u64,
    pub limit: u64,
}

impl Pagination {
    pub fn new(page: u64, limit: u64, total_count: u64) -> Self {
        Self {
            current_page: page,
            total_pages: total_count.div_ceil(limit).max(1),
            total_count,
            limit,
        }
    }
}

/// One page of results plus its envelope metadata.
#[derive(Clone, Debug, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Paged<T> {
    /// Pages an already-filtered, already-sorted in-memory collection.
    pub fn slice(all: Vec<T>, page: u64, limit: u64) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(((page - 1) * limit) as usize)
            .take(limit as usize)
            .collect();
        Self {
            items,
            pagination: Pagination::new(page, limit, total),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paged<U> {
        Paged {
            items: self.items.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_applies_defaults_and_clamps() {
        let req = PageRequest {
            page: None,
            limit: None,
        };
        assert_eq!(req.normalize(20), (1, 20));

        let req = PageRequest {
            page: Some(0),
            limit: Some(10_000),
        };
        assert_eq!(req.normalize(20), (1, MAX_PAGE_LIMIT));
    }

    #[test]
    fn slicing_pages_in_order() {
        let paged = Paged::slice((1..=45).collect::<Vec<_>>(), 3, 20);
        assert_eq!(paged.items, (41..=45).collect::<Vec<_>>());
        assert_eq!(paged.pagination.total_pages, 3);
        assert_eq!(paged.pagination.total_count, 45);
    }

    #[test]
    fn empty_collection_still_reports_one_page() {
        let paged = Paged::slice(Vec::<u8>::new(), 1, 20);
        assert!(paged.items.is_empty());
        assert_eq!(paged.pagination.total_pages, 1);
    }
}
