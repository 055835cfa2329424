mod common;

use common::{column, find, new_article, new_author, new_user, seed_author, seed_user, session, writes};
use rowgraph::{Assign, Member, Value};

#[test]
fn saving_a_user_inserts_its_author_with_the_generated_key() {
    let mut session = session();
    let user = new_user(&mut session, "JohnD");
    let author = new_author(&mut session, user, "Doe");

    let flushed = session.save(user).expect("save");
    assert_eq!(flushed.inserted, 2);
    assert_eq!(flushed.updated, 0);

    assert_eq!(
        writes(&session),
        vec![
            r#"INSERT INTO "user" ("username", "password") VALUES ($1, $2)"#,
            r#"INSERT INTO "author" ("firstname", "lastname", "email", "user_id", "editor_id") VALUES ($1, $2, $3, $4, $5)"#,
        ]
    );
    assert_eq!(session.field(user, "id").unwrap(), Value::Int(1));
    assert_eq!(session.field(author, "user_id").unwrap(), Value::Int(1));
    assert_eq!(column(&session, "author", 0, "user_id"), Value::Int(1));

    assert!(session.record(user).unwrap().exists());
    assert!(!session.record(author).unwrap().is_modified());
    assert_eq!(session.internal_id(author).unwrap(), "1");
    assert!(session.pending().is_empty());
    assert_eq!(session.connection().commits(), 1);
}

#[test]
fn saving_the_owner_first_schedules_the_referenced_record_before_it() {
    let mut session = session();
    let user = new_user(&mut session, "JohnD");
    let author = new_author(&mut session, user, "Doe");

    session.schedule_save(author).expect("schedule");
    assert_eq!(session.pending().inserts(), &[user, author]);
}

#[test]
fn saving_twice_writes_nothing_the_second_time() {
    let mut session = session();
    let user = new_user(&mut session, "JohnD");
    new_author(&mut session, user, "Doe");
    session.save(user).expect("first save");
    session.connection_mut().clear_log();

    let flushed = session.save(user).expect("second save");
    assert_eq!(flushed.total(), 0);
    assert!(writes(&session).is_empty());
}

#[test]
fn modified_persisted_record_is_updated_with_changed_fields_only() {
    let mut session = session();
    seed_user(session.connection_mut(), 1, "JohnD");
    let user = find(&mut session, "user", 1);

    session.set_field(user, "password", "changed").unwrap();
    assert!(session.record(user).unwrap().is_field_modified("password"));
    let flushed = session.save(user).expect("save");
    assert_eq!(flushed.updated, 1);

    let statements = session.connection().statements();
    let update = statements
        .iter()
        .find(|s| s.sql.starts_with("UPDATE"))
        .expect("update executed");
    assert_eq!(update.sql, r#"UPDATE "user" SET "password" = $1 WHERE "id" = $2"#);
    assert_eq!(update.params, vec![Value::from("changed"), Value::Int(1)]);
    assert_eq!(column(&session, "user", 0, "password"), Value::from("changed"));
}

#[test]
fn writing_an_unchanged_value_does_not_dirty_the_record() {
    let mut session = session();
    seed_user(session.connection_mut(), 1, "JohnD");
    let user = find(&mut session, "user", 1);

    session.set_field(user, "username", "JohnD").unwrap();
    assert!(!session.record(user).unwrap().is_modified());

    session.set_field(user, "username", "Other").unwrap();
    session.set_field(user, "username", "JohnD").unwrap();
    assert!(!session.record(user).unwrap().is_modified());
}

#[test]
fn mutually_editing_authors_need_one_deferred_update() {
    let mut session = session();
    let first_user = new_user(&mut session, "first");
    let second_user = new_user(&mut session, "second");
    let a = new_author(&mut session, first_user, "A");
    let b = new_author(&mut session, second_user, "B");
    session.link(a, "Editor", Some(b)).unwrap();
    session.link(b, "Editor", Some(a)).unwrap();

    let flushed = session.save(a).expect("save");
    assert_eq!(flushed.inserted, 4);
    assert_eq!(flushed.updated, 1);

    let writes = writes(&session);
    assert_eq!(writes.len(), 5);
    assert!(writes[4].starts_with(r#"UPDATE "author" SET "editor_id""#));

    let a_id = session.field(a, "id").unwrap();
    let b_id = session.field(b, "id").unwrap();
    assert_eq!(session.field(a, "editor_id").unwrap(), b_id);
    assert_eq!(session.field(b, "editor_id").unwrap(), a_id);
    assert!(!session.record(b).unwrap().is_modified());

    let rows = session.connection().rows("author").unwrap();
    for row in rows {
        assert!(!row.get_by_name("editor_id").unwrap().is_null());
    }
}

#[test]
fn tagging_an_article_inserts_the_link_row_after_both_ends() {
    let mut session = session();
    let user = new_user(&mut session, "JohnD");
    let author = new_author(&mut session, user, "Doe");
    let article = new_article(&mut session, author, "Hello");
    let tag = session.create_record("tag", [("name", "rust")]).unwrap();

    let link = session.new_record("article2tag").unwrap();
    session.link(link, "Article", Some(article)).unwrap();
    session.link(link, "Tag", Some(tag)).unwrap();

    let flushed = session.save(user).expect("save");
    assert_eq!(flushed.inserted, 5);
    assert!(writes(&session).last().unwrap().starts_with(r#"INSERT INTO "article2tag""#));

    assert_eq!(session.internal_id(link).unwrap(), "1|1");
    assert_eq!(
        session.get_by_internal_id("article2tag", "1|1").unwrap(),
        Some(link)
    );
    assert_eq!(
        session.collection(tag, "Article2tagHasMany").unwrap(),
        Some(vec![link])
    );
}

#[test]
fn changing_an_identifier_rewrites_loaded_foreign_keys() {
    let mut session = session();
    seed_user(session.connection_mut(), 1, "JohnD");
    seed_author(session.connection_mut(), 1, 1, None);
    let user = find(&mut session, "user", 1);
    let author = find(&mut session, "author", 1);
    assert_eq!(session.related(user, "Author").unwrap(), Some(author));

    session.set_field(user, "id", 10).unwrap();
    let flushed = session.save(user).expect("save");
    assert_eq!(flushed.updated, 2);

    assert_eq!(session.internal_id(user).unwrap(), "10");
    assert_eq!(session.get_by_internal_id("user", "1").unwrap(), None);
    assert_eq!(session.field(author, "user_id").unwrap(), Value::Int(10));
    assert!(!session.record(author).unwrap().is_modified());
    assert_eq!(session.related(author, "User").unwrap(), Some(user));
    assert_eq!(column(&session, "author", 0, "user_id"), Value::Int(10));
}

#[test]
fn replacing_a_collection_unlinks_dropped_members() {
    let mut session = session();
    let user = new_user(&mut session, "JohnD");
    let author = new_author(&mut session, user, "Doe");
    let kept = new_article(&mut session, author, "kept");
    let dropped = new_article(&mut session, author, "dropped");
    assert_eq!(
        session.get(author, "Article").unwrap(),
        Member::Many(vec![kept, dropped])
    );

    session
        .set(author, "Article", Assign::Collection(vec![kept]))
        .unwrap();
    assert_eq!(session.related(dropped, "Author").unwrap(), None);
    assert_eq!(session.related(kept, "Author").unwrap(), Some(author));

    // the dropped article is unreachable and stays unsaved
    session.save(user).expect("save");
    assert!(!session.record(dropped).unwrap().exists());
    assert_eq!(session.connection().row_count("article").unwrap(), 1);
}
