//! Page tree integration tests against the in-memory backend.

use folio_collab::config::CollabConfig;
use folio_collab::session::Services;
use folio_core::DocumentId;

fn titles(pages: &[folio_core::Page]) -> Vec<&str> {
    pages.iter().map(|p| p.title.as_str()).collect()
}

#[tokio::test]
async fn test_reorder_second_page_before_first() {
    let services = Services::in_memory(CollabConfig::for_testing());
    let tree = services.page_tree();
    let doc = DocumentId::from("D");

    let p1 = tree.create(&doc, "P1", None).await.unwrap();
    let p2 = tree.create(&doc, "P2", None).await.unwrap();
    assert_eq!(p1.order_key, 1.0);
    assert_eq!(p2.order_key, 2.0);

    tree.reorder(&p2.id, Some(&p1.id)).await.unwrap();
    let listed = tree.list(&doc, None).await.unwrap();
    assert_eq!(titles(&listed), vec!["P2", "P1"]);
    assert!(listed[0].order_key < 1.0);
    assert_eq!(tree.first_page(&doc).await.unwrap().unwrap().id, p2.id);
}

#[tokio::test]
async fn test_every_page_gets_its_own_editor_document() {
    let services = Services::in_memory(CollabConfig::for_testing());
    let tree = services.page_tree();
    let doc = DocumentId::from("D");

    let top = tree.create(&doc, "Top", None).await.unwrap();
    let sub = tree.create(&doc, "Sub", Some(&top.id)).await.unwrap();
    assert_ne!(top.doc_id, sub.doc_id);
    for page in [&top, &sub] {
        let size = services.engine.read(&page.doc_id, |d| d.text().len()).await.unwrap();
        assert_eq!(size, 0);
    }
}

#[tokio::test]
async fn test_subpages_order_independently() {
    let services = Services::in_memory(CollabConfig::for_testing());
    let tree = services.page_tree();
    let doc = DocumentId::from("D");

    let a = tree.create(&doc, "A", None).await.unwrap();
    let b = tree.create(&doc, "B", None).await.unwrap();
    let a1 = tree.create(&doc, "A1", Some(&a.id)).await.unwrap();
    let a2 = tree.create(&doc, "A2", Some(&a.id)).await.unwrap();
    tree.create(&doc, "B1", Some(&b.id)).await.unwrap();

    // Sub-page keys start over in each group
    assert_eq!(a1.order_key, 1.0);
    tree.reorder(&a2.id, Some(&a1.id)).await.unwrap();

    let nodes = tree.tree(&doc).await.unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(titles(&nodes[0].children), vec!["A2", "A1"]);
    assert_eq!(titles(&nodes[1].children), vec!["B1"]);
    assert_eq!(titles(&tree.list(&doc, Some(&a.id)).await.unwrap()), vec!["A2", "A1"]);
}

#[tokio::test]
async fn test_repeated_moves_to_front_stay_ordered() {
    let services = Services::in_memory(CollabConfig::for_testing());
    let tree = services.page_tree();
    let doc = DocumentId::from("D");

    let mut pages = Vec::new();
    for title in ["one", "two", "three", "four"] {
        pages.push(tree.create(&doc, title, None).await.unwrap());
    }
    // Move each later page to the front in turn
    for page in pages.iter().skip(1) {
        let first = tree.first_page(&doc).await.unwrap().unwrap();
        tree.reorder(&page.id, Some(&first.id)).await.unwrap();
    }
    let listed = tree.list(&doc, None).await.unwrap();
    assert_eq!(titles(&listed), vec!["four", "three", "two", "one"]);
}

#[tokio::test]
async fn test_documents_are_isolated() {
    let services = Services::in_memory(CollabConfig::for_testing());
    let tree = services.page_tree();
    let d1 = DocumentId::from("D1");
    let d2 = DocumentId::from("D2");

    let x = tree.create(&d1, "X", None).await.unwrap();
    let y = tree.create(&d2, "Y", None).await.unwrap();
    assert_eq!(y.order_key, 1.0);

    // A target from another document resolves to the end of the group
    tree.reorder(&x.id, Some(&y.id)).await.unwrap();
    assert_eq!(titles(&tree.list(&d1, None).await.unwrap()), vec!["X"]);
    assert_eq!(titles(&tree.list(&d2, None).await.unwrap()), vec!["Y"]);
}
