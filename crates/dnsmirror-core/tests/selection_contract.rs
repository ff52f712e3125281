//! Contract Test: Selection Consistency
//!
//! Verifies that the selection follows the data, not the view:
//! - Query, filter, sort and paging changes never prune it
//! - Switching zones empties it
//! - Records that disappear from the store leave it
//! - "Select all" only reaches the visible page

mod common;

use common::*;
use dnsmirror_core::{SessionConfig, SortDirection, SortKey};
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn selection_survives_view_changes() {
    let store = Arc::new(MockRecordStore::new());
    let (session, _events) = session_on(&store, test_config()).await;
    session.toggle_selection(&id("r1"));
    session.toggle_selection(&id("r4"));

    session.set_query("mail");
    assert_eq!(session.view().page.filtered_count, 1);
    session.toggle_type_filter("MX");
    session.toggle_proxied_filter(true);
    session.set_sort(SortKey::Content, SortDirection::Descending);
    session.set_page_size(2).unwrap();
    session.set_page(3);
    session.view();
    session.clear_filters();

    assert_eq!(session.selected_ids(), vec![id("r1"), id("r4")]);
}

#[tokio::test(start_paused = true)]
async fn zone_switch_empties_selection() {
    let store = Arc::new(MockRecordStore::new());
    let (session, _events) = session_on(&store, test_config()).await;
    session.select_all_visible();
    assert_eq!(session.selected_ids().len(), 7);

    session.select_zone(ZONE_B).await.unwrap();
    assert!(session.selected_ids().is_empty());
    assert_eq!(session.view_parameters().page_index, 1);

    // selecting the same zone again is only a refresh
    session.toggle_selection(&id("b1"));
    session.select_zone("example.org").await.unwrap();
    assert_eq!(session.selected_ids(), vec![id("b1")]);
}

#[tokio::test(start_paused = true)]
async fn select_all_reaches_only_the_visible_page() {
    let store = Arc::new(MockRecordStore::new());
    let config = SessionConfig {
        default_page_size: 3,
        ..test_config()
    };
    let (session, _events) = session_on(&store, config).await;
    assert_eq!(session.view().page.total_pages, 3);

    session.select_all_visible();
    assert_eq!(session.selected_ids().len(), 3);

    session.set_page(2);
    session.toggle_all_visible();
    assert_eq!(session.selected_ids().len(), 6);

    session.toggle_all_visible();
    assert_eq!(session.selected_ids().len(), 3, "second toggle deselects the page");

    session.set_page(1);
    session.clear_visible_selection();
    assert!(session.selected_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn records_gone_from_store_leave_selection() {
    let store = Arc::new(MockRecordStore::new());
    let (session, _events) = session_on(&store, test_config()).await;
    session.toggle_selection(&id("r2"));
    session.toggle_selection(&id("r7"));

    store.remove_remote(ZONE_A, "r7");
    session.refresh(true).await.unwrap();

    assert_eq!(session.selected_ids(), vec![id("r2")]);
}

#[tokio::test(start_paused = true)]
async fn page_past_the_end_snaps_back() {
    let store = Arc::new(MockRecordStore::new());
    let (session, _events) = session_on(&store, test_config()).await;

    session.set_page_size(3).unwrap();
    session.set_page(9);
    let view = session.view();
    assert_eq!(view.page.page_index, 3);
    assert_eq!(session.view_parameters().page_index, 3);

    session.set_query("192.168");
    assert_eq!(session.view_parameters().page_index, 1, "query change resets paging");
    assert!(session.set_page_size(0).is_err());
}

#[tokio::test(start_paused = true)]
async fn names_are_displayed_relative_to_the_apex() {
    let store = Arc::new(MockRecordStore::new());
    let (session, _events) = session_on(&store, test_config()).await;

    let view = session.view();
    let names: Vec<String> = view.records.iter().map(|r| session.display_name(r)).collect();
    assert!(names.contains(&"@".to_string()));
    assert!(names.contains(&"_dmarc".to_string()));
    assert!(names.contains(&"www".to_string()));
}

#[tokio::test(start_paused = true)]
async fn sort_by_same_column_flips_direction() {
    let store = Arc::new(MockRecordStore::new());
    let (session, _events) = session_on(&store, test_config()).await;

    session.sort_by(SortKey::Type);
    assert_eq!(session.view_parameters().sort_direction, SortDirection::Descending);
    assert_eq!(session.view().records[0].record_type, "TXT");

    session.sort_by(SortKey::Name);
    let params = session.view_parameters();
    assert_eq!(params.sort_key, SortKey::Name);
    assert_eq!(params.sort_direction, SortDirection::Ascending);
}
