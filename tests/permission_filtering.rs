use dirdb::schema::{
    FieldDef, ObjectTypeDef, FIELD_OWNER_LIST, FIELD_OWNER_MEMBERS, OWNER_GROUP_TYPE, PERSONA_TYPE,
};
use dirdb::value::ValueKind;
use dirdb::{
    Comparator, DataNode, DirDb, DirDbConfig, Invid, PermEntry, PermMatrix, PermissionView,
    QueryEngine, QueryNode, QuerySpec,
};

const USER_TYPE: u16 = 10;
const F_NAME: u16 = 100;
const F_SECRET: u16 = 101;

fn open_db() -> DirDb {
    let db = DirDb::new(DirDbConfig::testing());
    db.schema().register(
        ObjectTypeDef::new(OWNER_GROUP_TYPE, "owner group", F_NAME)
            .with_field(
                FieldDef::new(FIELD_OWNER_LIST, "owner list", ValueKind::Invid)
                    .vector()
                    .targeting(OWNER_GROUP_TYPE),
            )
            .with_field(
                FieldDef::new(FIELD_OWNER_MEMBERS, "members", ValueKind::Invid)
                    .vector()
                    .targeting(PERSONA_TYPE),
            )
            .with_field(FieldDef::new(F_NAME, "name", ValueKind::Text)),
    );
    db.schema().register(
        ObjectTypeDef::new(PERSONA_TYPE, "persona", F_NAME)
            .with_field(FieldDef::new(F_NAME, "name", ValueKind::Text)),
    );
    db.schema().register(
        ObjectTypeDef::new(USER_TYPE, "user", F_NAME)
            .with_field(
                FieldDef::new(FIELD_OWNER_LIST, "owner list", ValueKind::Invid)
                    .vector()
                    .targeting(OWNER_GROUP_TYPE),
            )
            .with_field(FieldDef::new(F_NAME, "name", ValueKind::Text))
            .with_field(FieldDef::new(F_SECRET, "secret", ValueKind::Text)),
    );
    db
}

struct Fixture {
    db: DirDb,
    persona: Invid,
    outer_group: Invid,
    inner_group: Invid,
    owned_user: Invid,
    other_user: Invid,
}

/// Builds: persona alice, member of outer_group; inner_group owned by
/// outer_group; one user owned by inner_group, one unowned.
fn build_fixture() -> Fixture {
    let db = open_db();
    let admin = db.supergash_session("admin");
    admin.begin_transaction().expect("begin");

    let persona = admin.create_object(PERSONA_TYPE, "alice").expect("persona");
    admin
        .update_object(persona, |obj| obj.set_scalar(F_NAME, "alice"))
        .expect("fields");

    let outer_group = admin
        .create_object(OWNER_GROUP_TYPE, "operators")
        .expect("group");
    admin
        .update_object(outer_group, |obj| {
            obj.set_scalar(F_NAME, "operators");
            obj.set_vector(FIELD_OWNER_MEMBERS, vec![persona.into()]);
        })
        .expect("fields");

    let inner_group = admin
        .create_object(OWNER_GROUP_TYPE, "helpdesk")
        .expect("group");
    admin
        .update_object(inner_group, |obj| {
            obj.set_scalar(F_NAME, "helpdesk");
            obj.set_vector(FIELD_OWNER_LIST, vec![outer_group.into()]);
        })
        .expect("fields");

    let owned_user = admin.create_object(USER_TYPE, "bob").expect("user");
    admin
        .update_object(owned_user, |obj| {
            obj.set_scalar(F_NAME, "bob");
            obj.set_scalar(F_SECRET, "hunter2");
            obj.set_vector(FIELD_OWNER_LIST, vec![inner_group.into()]);
        })
        .expect("fields");

    let other_user = admin.create_object(USER_TYPE, "mallory").expect("user");
    admin
        .update_object(other_user, |obj| obj.set_scalar(F_NAME, "mallory"))
        .expect("fields");

    admin.commit_transaction().expect("commit");
    Fixture {
        db,
        persona,
        outer_group,
        inner_group,
        owned_user,
        other_user,
    }
}

fn alice_view(fixture: &Fixture) -> PermissionView {
    // Owned objects are fully editable; everything else is view-only.
    let owned = PermMatrix::new()
        .with_type(USER_TYPE, PermEntry::full())
        .with_type(OWNER_GROUP_TYPE, PermEntry::full());
    let default = PermMatrix::new()
        .with_type(USER_TYPE, PermEntry::view_only())
        .with_field(USER_TYPE, F_SECRET, PermEntry::none());
    PermissionView::for_persona(fixture.persona, owned, default)
}

#[test]
fn ownership_is_transitive_through_the_owner_group_graph() {
    let fixture = build_fixture();
    let alice = fixture.db.login("alice", alice_view(&fixture));

    // bob is owned by helpdesk, which operators contains, and alice is an
    // operator: the owned matrix applies and bob is editable.
    let editable = QueryEngine::new(&alice)
        .query(&QuerySpec::all(USER_TYPE).editable_only())
        .expect("query");
    assert_eq!(editable.len(), 1);
    assert_eq!(editable.rows()[0].invid, fixture.owned_user);
    assert!(editable.rows()[0].editable);
}

#[test]
fn unowned_objects_fall_back_to_the_default_matrix() {
    let fixture = build_fixture();
    let alice = fixture.db.login("alice", alice_view(&fixture));

    let all = QueryEngine::new(&alice)
        .query(&QuerySpec::all(USER_TYPE))
        .expect("query");
    assert_eq!(all.len(), 2);
    let mallory = all
        .iter()
        .find(|row| row.invid == fixture.other_user)
        .expect("mallory row");
    assert!(!mallory.editable);
}

#[test]
fn types_without_a_matrix_row_are_invisible() {
    let fixture = build_fixture();
    // A view whose matrices say nothing about personas.
    let alice = fixture.db.login("alice", alice_view(&fixture));

    let personas = QueryEngine::new(&alice)
        .query(&QuerySpec::all(PERSONA_TYPE))
        .expect("query");
    assert!(personas.is_empty());
}

#[test]
fn unreadable_field_cannot_be_matched_against() {
    let fixture = build_fixture();
    let alice = fixture.db.login("alice", alice_view(&fixture));

    // mallory's secret field is hidden from the default matrix, so a match
    // on it fails even with the right value; bob is owned and readable.
    let spec = QuerySpec::matching(
        USER_TYPE,
        QueryNode::Data(DataNode::new("secret", Comparator::Equals, "hunter2")),
    );
    let result = QueryEngine::new(&alice).query(&spec).expect("query");
    assert_eq!(result.len(), 1);
    assert_eq!(result.rows()[0].invid, fixture.owned_user);
}

#[test]
fn visibility_filter_checks_the_direct_owner_list_only() {
    let fixture = build_fixture();
    let alice = fixture.db.login("alice", alice_view(&fixture));

    // bob's owner list names helpdesk directly; filtering on helpdesk
    // passes.
    alice.set_visibility_filter(vec![fixture.inner_group]);
    let direct = QueryEngine::new(&alice)
        .query(&QuerySpec::all(USER_TYPE).filtered())
        .expect("query");
    assert_eq!(direct.len(), 1);
    assert_eq!(direct.rows()[0].invid, fixture.owned_user);

    // Filtering on operators excludes bob: the filter set is matched
    // against the object's direct owner list without recursing, even
    // though operators contains helpdesk.
    alice.set_visibility_filter(vec![fixture.outer_group]);
    let indirect = QueryEngine::new(&alice)
        .query(&QuerySpec::all(USER_TYPE).filtered())
        .expect("query");
    assert!(indirect.is_empty());

    // Clearing the filter restores the unrestricted view.
    alice.set_visibility_filter(Vec::new());
    let unrestricted = QueryEngine::new(&alice)
        .query(&QuerySpec::all(USER_TYPE).filtered())
        .expect("query");
    assert_eq!(unrestricted.len(), 2);
}

#[test]
fn internal_query_bypasses_the_visibility_filter() {
    let fixture = build_fixture();
    let alice = fixture.db.login("alice", alice_view(&fixture));
    alice.set_visibility_filter(vec![fixture.outer_group]);

    let rows = QueryEngine::new(&alice)
        .internal_query(&QuerySpec::all(USER_TYPE).filtered())
        .expect("internal");
    assert_eq!(rows.len(), 2);
}

#[test]
fn unfiltered_query_ignores_the_visibility_filter() {
    let fixture = build_fixture();
    let alice = fixture.db.login("alice", alice_view(&fixture));
    alice.set_visibility_filter(vec![fixture.outer_group]);

    let rows = QueryEngine::new(&alice)
        .query(&QuerySpec::all(USER_TYPE))
        .expect("query");
    assert_eq!(rows.len(), 2);
}

#[test]
fn dump_projects_only_visible_fields() {
    let fixture = build_fixture();
    let alice = fixture.db.login("alice", alice_view(&fixture));

    let dump = QueryEngine::new(&alice)
        .dump(&QuerySpec::all(USER_TYPE))
        .expect("dump");
    // The secret field is hidden at the type level, so it is absent from
    // the header and from every row.
    assert!(dump.field_ids().all(|id| id != F_SECRET));
    for row in &dump.rows {
        assert!(!row.values.contains_key(&F_SECRET));
    }
}

#[test]
fn dump_permit_list_narrows_the_projection() {
    let fixture = build_fixture();
    let admin = fixture.db.supergash_session("admin");

    let dump = QueryEngine::new(&admin)
        .dump(&QuerySpec::all(USER_TYPE).with_permit_list(vec![F_NAME]))
        .expect("dump");
    let ids: Vec<u16> = dump.field_ids().collect();
    assert_eq!(ids, vec![F_NAME]);
    let bob = dump
        .rows
        .iter()
        .find(|row| row.invid == fixture.owned_user)
        .expect("bob row");
    assert!(bob.values.contains_key(&F_NAME));
    assert!(!bob.values.contains_key(&F_SECRET));
}

#[test]
fn supergash_sees_and_edits_everything() {
    let fixture = build_fixture();
    let admin = fixture.db.supergash_session("admin");

    let rows = QueryEngine::new(&admin)
        .query(&QuerySpec::all(USER_TYPE).editable_only())
        .expect("query");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.editable));
}

#[test]
fn owner_groups_are_self_owning() {
    let fixture = build_fixture();
    let alice = fixture.db.login("alice", alice_view(&fixture));

    // alice is a member of operators; operators owns itself, so the owned
    // matrix applies to it.
    let editable = QueryEngine::new(&alice)
        .query(&QuerySpec::all(OWNER_GROUP_TYPE).editable_only())
        .expect("query");
    assert!(editable.contains(fixture.outer_group));
    // helpdesk is owned by operators too, through its owner list.
    assert!(editable.contains(fixture.inner_group));
}

#[test]
fn unauthenticated_views_see_only_the_default_matrix() {
    let fixture = build_fixture();
    let guest = fixture.db.login(
        "guest",
        PermissionView::unauthenticated(
            PermMatrix::new().with_type(USER_TYPE, PermEntry::view_only()),
        ),
    );

    let rows = QueryEngine::new(&guest)
        .query(&QuerySpec::all(USER_TYPE))
        .expect("query");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| !row.editable));

    let editable = QueryEngine::new(&guest)
        .query(&QuerySpec::all(USER_TYPE).editable_only())
        .expect("query");
    assert!(editable.is_empty());
}
