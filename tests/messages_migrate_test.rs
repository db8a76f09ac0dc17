// tests/messages_migrate_test.rs
// §8 round-trip law: migrate messages then list = input sorted ascending.
// Plus the `before=<oldest>` boundary: an empty page with no error.

use relay_backend::store::models::Message;
use relay_backend::store::Store;

async fn seeded() -> (Store, String, String) {
    let store = Store::in_memory().await.unwrap();
    let user = store
        .create_user(&uuid::Uuid::new_v4().to_string(), "u@x.com", None, "individual")
        .await
        .unwrap();
    let role = store
        .create_role(&uuid::Uuid::new_v4().to_string(), &user.id, None, "default")
        .await
        .unwrap();
    (store, user.id, role.id)
}

#[tokio::test]
async fn migrating_out_of_order_messages_lists_ascending() {
    let (store, user_id, role_id) = seeded().await;

    let mut entries = vec![
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.clone(),
            role_id: role_id.clone(),
            group_id: None,
            role: "user".to_string(),
            content: "third".to_string(),
            created_at: 300,
        },
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.clone(),
            role_id: role_id.clone(),
            group_id: None,
            role: "assistant".to_string(),
            content: "first".to_string(),
            created_at: 100,
        },
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.clone(),
            role_id: role_id.clone(),
            group_id: None,
            role: "user".to_string(),
            content: "second".to_string(),
            created_at: 200,
        },
    ];

    // Migrate in the out-of-order sequence above.
    for entry in &entries {
        store.save_message(entry).await.unwrap();
    }

    let listed = store.list_messages(&role_id, 10, None).await.unwrap();
    let listed_contents: Vec<&str> = listed.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(listed_contents, vec!["first", "second", "third"]);

    entries.sort_by_key(|m| m.created_at);
    let expected: Vec<&str> = entries.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(listed_contents, expected);
}

#[tokio::test]
async fn before_oldest_message_returns_empty_page() {
    let (store, user_id, role_id) = seeded().await;

    let oldest = Message {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.clone(),
        role_id: role_id.clone(),
        group_id: None,
        role: "user".to_string(),
        content: "oldest".to_string(),
        created_at: 100,
    };
    store.save_message(&oldest).await.unwrap();

    let page = store.list_messages(&role_id, 10, Some(&oldest.id)).await.unwrap();
    assert!(page.is_empty());
}

#[tokio::test]
async fn re_saving_a_message_is_idempotent() {
    let (store, user_id, role_id) = seeded().await;

    let msg = Message {
        id: uuid::Uuid::new_v4().to_string(),
        user_id,
        role_id: role_id.clone(),
        group_id: None,
        role: "user".to_string(),
        content: "hello".to_string(),
        created_at: 100,
    };

    store.save_message(&msg).await.unwrap();
    store.save_message(&msg).await.unwrap();

    let listed = store.list_messages(&role_id, 10, None).await.unwrap();
    assert_eq!(listed.len(), 1);
}
