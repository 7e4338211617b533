use super::*;
use pretty_assertions::assert_eq;

#[test]
fn config_defaults_match_contract() {
    let cfg = Config::default();
    assert_eq!(cfg.page_size, 1024);
    assert_eq!(cfg.max_pages, 1024);
    assert_eq!(cfg.initial_pages, 1024);
    assert!(cfg.enable_parallel_sorting);
    assert_eq!(cfg.parallel_sort_threshold, 1000);
    assert!(cfg.enable_prefix_index);
    assert!(cfg.enable_suffix_index);
}

#[test]
fn config_builder_overrides() {
    let cfg = Config::builder()
        .page_size(8)
        .max_pages(2)
        .initial_pages(1)
        .enable_parallel_sorting(false)
        .build();
    assert_eq!(cfg.page_size, 8);
    assert_eq!(cfg.max_pages, 2);
    assert!(!cfg.enable_parallel_sorting);
}

#[test]
fn errors_format_cleanly() {
    let err = EngineError::BadInput("no property 'agee'".into());
    assert!(format!("{err}").contains("bad input"));
    let err = EngineError::TableFull("users: 16 pages".into());
    assert!(format!("{err}").contains("table full"));
    let err = EngineError::TransientConflict(64);
    assert!(format!("{err}").contains("64"));
}

#[test]
fn row_ids_order_by_raw_value() {
    assert!(RowId(1) < RowId(2));
    assert_eq!(RowId(7).raw(), 7);
}
