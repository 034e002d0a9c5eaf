mod common;

use common::{
    MemDoc, MemStore, OWNER_ACCESS_RULE, TestCompiler, TestEnv, access_is_owners, editor_session,
    env, owner_is_user, owner_session, resources_table, rules_table, viewer_session,
};
use rowgate::action::{DocAction, UserAction};
use rowgate::cell::CellValue;
use std::collections::BTreeMap;

const OWNER_RULE: &str = "rec.owner == user.Email";

/// Document where `Leads` is readable per row; this gives non-owners nuanced
/// access.
fn ruled_env() -> TestEnv {
    let doc = MemDoc::new();
    doc.insert(resources_table(&[(1, "Leads", "*")]));
    doc.insert(rules_table(&[
        (9, 1, OWNER_ACCESS_RULE, "+R", 0.5, ""),
        (10, 1, OWNER_RULE, "+R", 1.0, ""),
        (11, 1, "", "-R", 2.0, ""),
    ]));
    let compiler = TestCompiler::new()
        .on(OWNER_ACCESS_RULE, access_is_owners())
        .on(OWNER_RULE, owner_is_user("owner"));
    env(doc, MemStore::new(), compiler)
}

fn add_record(table_id: &str) -> UserAction {
    UserAction::Doc(DocAction::AddRecord {
        table_id: table_id.into(),
        row_id: 1,
        values: BTreeMap::from([("x".to_string(), CellValue::Int(1))]),
    })
}

fn add_column(table_id: &str) -> UserAction {
    UserAction::Doc(DocAction::AddColumn {
        table_id: table_id.into(),
        col_id: "extra".into(),
        info: BTreeMap::new(),
    })
}

#[tokio::test]
async fn always_ok_actions_pass_for_anyone() {
    let env = ruled_env();
    env.engine.update().await.unwrap();
    let viewer = viewer_session(3, "v@example.com");
    env.engine
        .can_apply_user_action(&viewer, &UserAction::Calculate)
        .unwrap();
    env.engine
        .can_apply_user_action(&viewer, &UserAction::UpdateCurrentTime)
        .unwrap();
}

#[tokio::test]
async fn schema_actions_require_non_nuanced_access() {
    let env = ruled_env();
    env.engine.update().await.unwrap();
    let bob = editor_session(7, "bob@example.com");
    let owner = owner_session(1);

    assert!(env.engine.has_nuanced_access(&bob));
    assert!(!env.engine.has_nuanced_access(&owner));

    let err = env
        .engine
        .can_apply_user_action(&bob, &add_column("Other"))
        .unwrap_err();
    assert_eq!(err.code_str(), "permission_denied");
    env.engine
        .can_apply_user_action(&owner, &add_column("Other"))
        .unwrap();

    let formula = UserAction::SetDisplayFormula {
        table_id: "Leads".into(),
        field_ref: 1,
        col_ref: 2,
        formula: "$owner".into(),
    };
    assert!(env.engine.can_apply_user_action(&bob, &formula).is_err());
    env.engine.can_apply_user_action(&owner, &formula).unwrap();
}

#[tokio::test]
async fn surprising_actions_require_full_access() {
    let env = ruled_env();
    env.engine.update().await.unwrap();
    let bob = editor_session(7, "bob@example.com");
    let owner = owner_session(1);

    let eval = UserAction::EvalCode {
        code: "1 + 1".into(),
    };
    assert!(env.engine.can_apply_user_action(&bob, &eval).is_err());
    env.engine.can_apply_user_action(&owner, &eval).unwrap();
    env.engine
        .can_apply_user_action(&owner, &UserAction::InitNewDoc)
        .unwrap();
}

#[tokio::test]
async fn record_writes_are_blocked_on_row_restricted_tables() {
    let env = ruled_env();
    env.engine.update().await.unwrap();
    let bob = editor_session(7, "bob@example.com");

    // Row-mixed read blocks writes in this version.
    let err = env
        .engine
        .can_apply_user_action(&bob, &add_record("Leads"))
        .unwrap_err();
    assert_eq!(err.code_str(), "permission_denied");

    // A table with no restriction stays writable.
    env.engine
        .can_apply_user_action(&bob, &add_record("Other"))
        .unwrap();
}

#[tokio::test]
async fn reserved_tables_require_non_nuanced_access() {
    let env = ruled_env();
    env.engine.update().await.unwrap();
    let bob = editor_session(7, "bob@example.com");
    let owner = owner_session(1);

    let action = add_record("_meta_AccessRules");
    assert!(env.engine.can_apply_user_action(&bob, &action).is_err());
    env.engine.can_apply_user_action(&owner, &action).unwrap();
}

#[tokio::test]
async fn wrapped_action_lists_recurse() {
    let env = ruled_env();
    env.engine.update().await.unwrap();
    let bob = editor_session(7, "bob@example.com");

    let ok_bundle = UserAction::ApplyDocActions(vec![UserAction::Calculate, add_record("Other")]);
    env.engine.can_apply_user_action(&bob, &ok_bundle).unwrap();

    let tainted = UserAction::ApplyUndoActions(vec![
        add_record("Other"),
        add_record("Leads"),
    ]);
    assert!(env.engine.can_apply_user_action(&bob, &tainted).is_err());

    env.engine
        .can_apply_user_actions(&bob, &[UserAction::Calculate, add_record("Other")])
        .unwrap();
}

#[tokio::test]
async fn unrecognized_actions_are_denied_even_for_owners() {
    let env = ruled_env();
    env.engine.update().await.unwrap();
    let raw = UserAction::Raw {
        name: "DoSomethingNew".into(),
    };
    let err = env
        .engine
        .can_apply_user_action(&owner_session(1), &raw)
        .unwrap_err();
    assert_eq!(err.code_str(), "permission_denied");
}

#[tokio::test]
async fn action_group_check_preserves_quirky_direction() {
    use rowgate::action::ActionGroup;
    let env = ruled_env();
    env.engine.update().await.unwrap();
    let group = ActionGroup {
        action_num: 9,
        actions: vec![DocAction::RemoveRecord {
            table_id: "Leads".into(),
            row_id: 1,
        }],
        desc: Some("change".into()),
    };

    // Sessions that may read everything get the stripped envelope; everyone
    // else gets the original. Deliberately left as-is pending review.
    let stripped = env
        .engine
        .filter_action_group(&owner_session(1), group.clone());
    assert!(stripped.actions.is_empty());
    assert!(stripped.desc.is_none());
    assert_eq!(stripped.action_num, 9);

    let bob = editor_session(7, "bob@example.com");
    let passed = env.engine.filter_action_group(&bob, group.clone());
    assert_eq!(passed, group);
}
