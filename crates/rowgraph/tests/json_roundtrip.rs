mod common;

use common::{
    column, find, new_article, new_author, new_user, seed_article, seed_author, seed_user, session,
    writes,
};
use rowgraph::{ConfigErrorKind, Error, Member, Value};
use serde_json::json;

#[test]
fn exported_record_resumes_as_persisted_in_another_session() {
    let mut source = session();
    let user = new_user(&mut source, "JohnD");
    let author = new_author(&mut source, user, "Doe");
    let article = new_article(&mut source, author, "Hello");
    source.save(user).expect("save");
    let exported = source.to_array(article, false, false).unwrap();
    assert_eq!(exported["_exists_"], json!(true));
    assert_eq!(exported["author_id"], json!(1));

    let mut target = session();
    seed_user(target.connection_mut(), 1, "JohnD");
    seed_author(target.connection_mut(), 1, 1, None);
    seed_article(target.connection_mut(), 1, 1);

    let imported = target
        .record_from_array("article", &exported, false, false)
        .unwrap();
    assert!(target.record(imported).unwrap().exists());
    assert!(!target.record(imported).unwrap().is_modified());
    assert_eq!(target.internal_id(imported).unwrap(), "1");

    // the identity map already holds the row
    target.connection_mut().clear_log();
    assert_eq!(find(&mut target, "article", 1), imported);
    assert!(target.connection().executed().is_empty());

    target.set_field(imported, "title", "Edited").unwrap();
    let flushed = target.save(imported).expect("update");
    assert_eq!(flushed.updated, 1);
    assert_eq!(column(&target, "article", 0, "title"), Value::from("Edited"));
}

#[test]
fn deep_import_builds_a_graph_that_saves_in_one_commit() {
    let mut session = session();
    let data = json!({
        "username": "JohnD",
        "password": "secret",
        "Author": {
            "lastname": "Doe",
            "email": "john@example.com",
            "Article": [
                {"title": "one", "teaser": "t", "text": "first"},
                {"title": "two", "teaser": "t", "text": "second"}
            ]
        }
    });
    let user = session.record_from_array("user", &data, true, false).unwrap();
    let author = session.related(user, "Author").unwrap().expect("author linked");
    assert_eq!(session.collection(author, "Article").unwrap().map(|a| a.len()), Some(2));

    let flushed = session.save(user).expect("save");
    assert_eq!(flushed.inserted, 4);
    assert_eq!(
        writes(&session)
            .iter()
            .filter(|sql| sql.starts_with(r#"INSERT INTO "article""#))
            .count(),
        2
    );
    assert_eq!(column(&session, "author", 0, "user_id"), Value::Int(1));
    assert_eq!(column(&session, "article", 1, "author_id"), Value::Int(1));
}

#[test]
fn deep_export_and_import_reproduce_the_same_graph() {
    let mut source = session();
    let user = new_user(&mut source, "JohnD");
    let author = new_author(&mut source, user, "Doe");
    let first = new_article(&mut source, author, "one");
    let second = new_article(&mut source, author, "two");
    let exported = source.to_array(user, true, false).unwrap();

    let mut target = session();
    let imported = target.record_from_array("user", &exported, true, false).unwrap();
    assert_eq!(target.to_array(imported, true, false).unwrap(), exported);

    let imported_author = target.related(imported, "Author").unwrap().expect("author");
    let imported_articles = target
        .collection(imported_author, "Article")
        .unwrap()
        .expect("articles");
    assert_eq!(imported_articles.len(), 2);
    let pairs = [
        (user, imported),
        (author, imported_author),
        (first, imported_articles[0]),
        (second, imported_articles[1]),
    ];
    for (original, copy) in pairs {
        assert_eq!(
            source.to_array(original, false, false).unwrap(),
            target.to_array(copy, false, false).unwrap()
        );
    }

    assert_eq!(target.save(imported).expect("save").inserted, 4);
}

#[test]
fn shallow_import_ignores_aliases() {
    let mut session = session();
    let data = json!({"username": "JohnD", "Author": {"lastname": "Doe"}, "nickname": "JD"});
    let user = session.record_from_array("user", &data, false, true).unwrap();

    assert_eq!(session.related(user, "Author").unwrap(), None);
    assert_eq!(session.table("author").unwrap().repository().len(), 0);
    assert_eq!(
        session.mapped_value(user, "nickname").unwrap(),
        Some(Value::from("JD"))
    );
}

#[test]
fn table_export_lists_tracked_records_in_creation_order() {
    let mut session = session();
    let first = new_user(&mut session, "first");
    let second = new_user(&mut session, "second");
    session.save(first).unwrap();
    session.save(second).unwrap();

    let exported = rowgraph::export_table(&mut session, "user", false).unwrap();
    assert_eq!(
        exported,
        json!([
            {"id": 1, "username": "first", "password": "secret", "_exists_": true},
            {"id": 2, "username": "second", "password": "secret", "_exists_": true}
        ])
    );
}

#[test]
fn deep_export_includes_loaded_collections_only() {
    let mut session = session();
    seed_user(session.connection_mut(), 1, "JohnD");
    seed_author(session.connection_mut(), 1, 1, None);
    seed_article(session.connection_mut(), 1, 1);
    seed_article(session.connection_mut(), 2, 1);
    let author = find(&mut session, "author", 1);

    let before = session.to_array(author, true, false).unwrap();
    assert!(before.get("Article").is_none());

    let Member::Many(articles) = session.load_related(author, "Article").unwrap() else {
        panic!("expected the article collection");
    };
    assert_eq!(articles.len(), 2);

    let exported = session.to_array(author, true, false).unwrap();
    let nested = exported["Article"].as_array().expect("articles exported");
    assert_eq!(nested.len(), 2);
    for article in nested {
        assert_eq!(article["_exists_"], json!(true));
        // the author is not repeated below its articles
        assert!(article.get("Author").is_none());
    }
}

#[test]
fn non_object_data_is_rejected() {
    let mut session = session();
    let user = new_user(&mut session, "JohnD");

    let err = session.from_array(user, &json!("JohnD"), false, false).unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ref e) if e.kind == ConfigErrorKind::InvalidValue
    ));
    assert_eq!(session.field(user, "username").unwrap(), Value::from("JohnD"));
}
