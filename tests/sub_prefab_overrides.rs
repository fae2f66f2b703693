//! Nested prefab instances and their per-instance overrides.

mod common;

use common::*;
use object_model::hierarchy::destroy_actor_with_hierarchy;
use object_model::{FieldCodec, FieldValue, ObjectModel};
use prefab::container::read_container;
use prefab::{
    ActorRecordBody, Deserializer, IdentityMap, LoadOptions, PrefabAssetSource, PrefabError, PrefabInstanceRegistry,
    PrefabLibrary, SaveOptions, SubPrefabData, SubPrefabMap,
};

fn library() -> PrefabLibrary {
    let mut library = PrefabLibrary::new();
    author_lamp(&mut library);
    library
}

fn bulb_of(scene: &object_model::SceneWorld, room_root: object_model::NodeId) -> object_model::NodeId {
    let lamp = child(scene, room_root, "Lamp");
    child(scene, lamp, "Bulb")
}

#[test]
fn interior_is_referenced_not_copied() {
    let library = library();
    let mut room = Room::new(&library);
    room.override_intensity(5.0);
    let saved = room.save();

    let (_, data) = read_container(&saved.bytes).unwrap();
    let records = data.root.walk();
    let full = records
        .iter()
        .filter(|(r, _)| matches!(r.body, ActorRecordBody::Actor { .. }))
        .count();
    assert_eq!(full, 1);
    let (nested, _) = records.iter().find(|(r, _)| r.is_sub_prefab()).unwrap();
    let ActorRecordBody::SubPrefab { guid_remap, overrides, .. } = &nested.body else {
        unreachable!()
    };
    // lamp, bulb and their root components
    assert_eq!(guid_remap.len(), 4);
    assert_eq!(overrides.len(), 1);
    // Only the room's own root component is an object record.
    assert_eq!(data.objects.len(), 1);
    assert_eq!(data.scene_parents.len(), 1);
}

#[test]
fn overrides_replay_on_load() {
    let library = library();
    let mut room = Room::new(&library);
    room.override_intensity(5.0);
    room.scene
        .set_field(room.bulb, "Color", FieldValue::Text("red".into()))
        .unwrap();
    let saved = room.save();

    let mut target = scene();
    let loaded = load(&mut target, &library, &saved.bytes, None);
    let lamp = child(&target, loaded.root, "Lamp");
    let bulb = child(&target, lamp, "Bulb");
    assert_eq!(target.field(bulb, "Intensity"), Some(&FieldValue::Float(5.0)));
    // Not overridden, so the nested asset's value wins.
    assert_eq!(target.field(bulb, "Color"), Some(&FieldValue::Text("white".into())));
    assert_eq!(target.field(lamp, "Intensity"), Some(&FieldValue::Float(0.5)));

    let instance = &loaded.sub_prefabs[&lamp];
    assert_eq!(instance.prefab_asset, LAMP);
    assert!(instance.is_overridden(bulb, "Intensity"));
    assert!(!instance.is_overridden(bulb, "Color"));
    assert!(instance.contains(bulb));
    assert_eq!(target.attach_parent_actor(lamp), Some(loaded.root));
}

#[test]
fn save_load_save_is_stable() {
    let library = library();
    let mut room = Room::new(&library);
    room.override_intensity(3.0);
    let first = room.save();

    let mut target = scene();
    let loaded = load(&mut target, &library, &first.bytes, None);
    let second = save(&target, loaded.root, &loaded.identity, &loaded.sub_prefabs);
    let (_, a) = read_container(&first.bytes).unwrap();
    let (_, b) = read_container(&second.bytes).unwrap();
    assert_eq!(a.root, b.root);
    assert_eq!(a.scene_parents, b.scene_parents);
    assert_eq!(first.stats, second.stats);
}

#[test]
fn only_overridable_fields() {
    let library = library();
    let mut room = Room::new(&library);
    let bulb = room.bulb;
    let room_root = room.root;
    let scene = &room.scene;
    let data = room.subs.get_mut(&room.lamp).unwrap();
    assert!(matches!(
        data.add_override(scene, bulb, "Mass"),
        Err(PrefabError::NotOverridable { .. })
    ));
    assert!(matches!(
        data.add_override(scene, room_root, "Intensity"),
        Err(PrefabError::NotSubPrefab(_))
    ));
}

#[test]
fn revert_restores_nested_defaults() {
    let library = library();
    let mut room = Room::new(&library);
    room.override_intensity(9.0);
    let bulb = room.bulb;
    let lamp = room.lamp;
    let data = room.subs.get_mut(&lamp).unwrap();
    data.revert_override(&mut room.scene, &FieldCodec, &library, bulb, &["Intensity".to_string()])
        .unwrap();
    assert_eq!(room.scene.field(bulb, "Intensity"), Some(&FieldValue::Float(1.0)));
    assert!(room.subs[&lamp].overrides.is_empty());

    // Nothing overridden any more, so a reload yields the asset's value.
    let saved = room.save();
    let mut target = scene();
    let loaded = load(&mut target, &library, &saved.bytes, None);
    let new_bulb = bulb_of(&target, loaded.root);
    assert_eq!(target.field(new_bulb, "Intensity"), Some(&FieldValue::Float(1.0)));
}

#[test]
fn revert_all_clears_every_override() {
    let library = library();
    let mut room = Room::new(&library);
    room.override_intensity(9.0);
    let lamp = room.lamp;
    room.scene
        .set_field(lamp, "Color", FieldValue::Text("green".into()))
        .unwrap();
    let scene = &room.scene;
    room.subs.get_mut(&lamp).unwrap().add_override(scene, lamp, "Color").unwrap();

    let data = room.subs.get_mut(&lamp).unwrap();
    data.revert_all_overrides(&mut room.scene, &FieldCodec, &library).unwrap();
    assert!(room.subs[&lamp].overrides.is_empty());
    assert_eq!(room.scene.field(room.bulb, "Intensity"), Some(&FieldValue::Float(1.0)));
    // The lamp asset never stored a colour for the lamp actor itself.
    assert_eq!(room.scene.field(lamp, "Color"), Some(&FieldValue::Text("green".into())));
}

#[test]
fn apply_writes_into_nested_asset() {
    let mut library = library();
    let mut room = Room::new(&library);
    room.override_intensity(7.0);
    let bulb = room.bulb;
    let lamp = room.lamp;
    let data = room.subs.get_mut(&lamp).unwrap();
    data.apply_override_to_asset(
        &mut room.scene,
        &FieldCodec,
        &mut library,
        bulb,
        &["Intensity".to_string()],
        &SaveOptions::default(),
    )
    .unwrap();
    assert!(room.subs[&lamp].overrides.is_empty());
    assert_eq!(room.scene.field(bulb, "Intensity"), Some(&FieldValue::Float(7.0)));

    let mut fresh = scene();
    let asset = library.load_asset(LAMP).unwrap();
    let loaded = load(&mut fresh, &library, &asset.data, None);
    let new_bulb = child(&fresh, loaded.root, "Bulb");
    assert_eq!(fresh.field(new_bulb, "Intensity"), Some(&FieldValue::Float(7.0)));
    assert_eq!(fresh.field(new_bulb, "Color"), Some(&FieldValue::Text("white".into())));
}

#[test]
fn apply_then_revert_is_a_no_op() {
    let mut library = library();
    let mut room = Room::new(&library);
    room.override_intensity(4.0);
    let (bulb, lamp) = (room.bulb, room.lamp);
    let fields = ["Intensity".to_string()];
    let data = room.subs.get_mut(&lamp).unwrap();
    data.apply_override_to_asset(&mut room.scene, &FieldCodec, &mut library, bulb, &fields, &SaveOptions::default())
        .unwrap();
    let data = room.subs.get_mut(&lamp).unwrap();
    data.revert_override(&mut room.scene, &FieldCodec, &library, bulb, &fields)
        .unwrap();
    assert_eq!(room.scene.field(bulb, "Intensity"), Some(&FieldValue::Float(4.0)));
}

#[test]
fn captured_overrides_replay_on_a_fresh_instance() {
    let library = library();
    let mut room = Room::new(&library);
    room.override_intensity(6.0);
    let captured = room.subs[&room.lamp]
        .capture_overrides(&room.scene, &FieldCodec)
        .unwrap();
    assert_eq!(captured.records.len(), 1);

    let mut fresh = scene();
    let asset = library.load_asset(LAMP).unwrap();
    let options = LoadOptions::default();
    let loaded = Deserializer::new(&mut fresh, &FieldCodec, &library, &options)
        .with_extra_overrides(&captured)
        .load(&asset.data, None, W)
        .unwrap();
    let bulb = child(&fresh, loaded.root, "Bulb");
    assert_eq!(fresh.field(bulb, "Intensity"), Some(&FieldValue::Float(6.0)));
}

#[test]
fn two_levels_of_nesting() {
    let mut library = library();
    let mut room = Room::new(&library);
    room.override_intensity(5.0);
    library.insert(ROOM, room.save().bytes).unwrap();

    // A house with one room instance; the house recolours the bulb.
    let mut house = scene();
    let house_root = spawn(&mut house, "Node", "House", None);
    let asset = library.load_asset(ROOM).unwrap();
    let room_instance = load(&mut house, &library, &asset.data, Some(house_root));
    let bulb = bulb_of(&house, room_instance.root);
    assert_eq!(house.field(bulb, "Intensity"), Some(&FieldValue::Float(5.0)));

    let mut subs = SubPrefabMap::new();
    let mut data = SubPrefabData::new(ROOM, instance_map(&room_instance.identity));
    house.set_field(bulb, "Color", FieldValue::Text("blue".into())).unwrap();
    data.add_override(&house, bulb, "Color").unwrap();
    subs.insert(room_instance.root, data);
    let saved = save(&house, house_root, &IdentityMap::new(), &subs);

    let mut target = scene();
    let loaded = load(&mut target, &library, &saved.bytes, None);
    let new_room = child(&target, loaded.root, "Room");
    let new_bulb = bulb_of(&target, new_room);
    assert_eq!(target.field(new_bulb, "Intensity"), Some(&FieldValue::Float(5.0)));
    assert_eq!(target.field(new_bulb, "Color"), Some(&FieldValue::Text("blue".into())));

    // Reverting at house level falls through the room to the lamp asset.
    let mut data = loaded.sub_prefabs[&new_room].clone();
    data.revert_override(&mut target, &FieldCodec, &library, new_bulb, &["Color".to_string()])
        .unwrap();
    assert_eq!(target.field(new_bulb, "Color"), Some(&FieldValue::Text("white".into())));
    assert_eq!(target.field(new_bulb, "Intensity"), Some(&FieldValue::Float(5.0)));
}

#[test]
fn self_referencing_asset_is_rejected() {
    let mut library = library();
    let mut authoring = scene();
    let root = spawn(&mut authoring, "Node", "Loop", None);
    let inner = spawn(&mut authoring, "Node", "Inner", Some(root));
    let mut subs = SubPrefabMap::new();
    subs.insert(
        inner,
        SubPrefabData::new("/Game/Loop", [(object_model::Guid::from_u128(1), inner)].into_iter().collect()),
    );
    let saved = save(&authoring, root, &IdentityMap::new(), &subs);
    library.insert("/Game/Loop", saved.bytes.clone()).unwrap();

    let mut target = scene();
    let result = prefab::load_prefab(&mut target, &FieldCodec, &library, &saved.bytes, None, W, &LoadOptions::default());
    assert!(matches!(result, Err(PrefabError::RecursivePrefab(_))));
    assert_eq!(target.node_count(), 0);
}

#[test]
fn nesting_depth_is_bounded() {
    let library = library();
    let room = Room::new(&library);
    let saved = room.save();
    let options = LoadOptions {
        max_nesting_depth: 0,
        ..LoadOptions::default()
    };
    let mut target = scene();
    let result = prefab::load_prefab(&mut target, &FieldCodec, &library, &saved.bytes, None, W, &options);
    assert!(matches!(result, Err(PrefabError::NestingTooDeep { max: 0 })));
    assert_eq!(target.node_count(), 0);
}

/// Edit the lamp asset in place: amber bulb, brighter lamp, and a new
/// `Shade` child. GUIDs of the existing nodes are kept.
fn edit_lamp(library: &mut PrefabLibrary) {
    let mut authoring = scene();
    let asset = library.load_asset(LAMP).unwrap();
    let loaded = load(&mut authoring, library, &asset.data, None);
    let bulb = child(&authoring, loaded.root, "Bulb");
    authoring.set_field(bulb, "Color", FieldValue::Text("amber".into())).unwrap();
    authoring.set_field(loaded.root, "Intensity", FieldValue::Float(0.8)).unwrap();
    spawn(&mut authoring, "Lamp", "Shade", Some(loaded.root));
    let saved = save(&authoring, loaded.root, &loaded.identity, &loaded.sub_prefabs);
    library.insert(LAMP, saved.bytes).unwrap();
}

/// Library holding the lamp and a room whose bulb intensity is overridden
/// to 5.
fn library_with_room() -> PrefabLibrary {
    let mut library = library();
    let mut room = Room::new(&library);
    room.override_intensity(5.0);
    library.insert(ROOM, room.save().bytes).unwrap();
    library
}

fn instantiate(
    registry: &mut PrefabInstanceRegistry,
    scene: &mut object_model::SceneWorld,
    library: &PrefabLibrary,
    path: &str,
) -> object_model::NodeId {
    registry
        .instantiate(scene, &FieldCodec, library, path, None, W, &LoadOptions::default())
        .unwrap()
}

#[test]
fn refresh_picks_up_asset_edits_and_keeps_overrides() {
    let mut library = library_with_room();
    let mut target = scene();
    let mut registry = PrefabInstanceRegistry::new();
    let root = instantiate(&mut registry, &mut target, &library, ROOM);
    let old_lamp = child(&target, root, "Lamp");
    let old_bulb = child(&target, old_lamp, "Bulb");
    let old_guid = registry.get(root).unwrap().identity.guid_of(old_bulb);
    assert!(old_guid.is_some());

    edit_lamp(&mut library);
    let refreshed = registry
        .refresh_instances(&mut target, &FieldCodec, &library, LAMP, &LoadOptions::default())
        .unwrap();
    assert_eq!(refreshed.len(), 1);
    assert!(!target.is_valid(old_lamp));
    assert!(!target.is_valid(old_bulb));

    let lamp = child(&target, root, "Lamp");
    assert_eq!(refreshed, vec![lamp]);
    assert_eq!(labels(&target, lamp), vec!["Bulb".to_string(), "Shade".to_string()]);
    let bulb = child(&target, lamp, "Bulb");
    assert_eq!(target.field(bulb, "Intensity"), Some(&FieldValue::Float(5.0)));
    assert_eq!(target.field(bulb, "Color"), Some(&FieldValue::Text("amber".into())));
    assert_eq!(target.field(lamp, "Intensity"), Some(&FieldValue::Float(0.8)));

    let instance = registry.get(root).unwrap();
    assert_eq!(instance.identity.guid_of(bulb), old_guid);
    let data = &instance.sub_prefabs[&lamp];
    assert!(data.is_overridden(bulb, "Intensity"));
    assert!(!data.is_overridden(bulb, "Color"));

    // The refreshed instance re-saves cleanly and keeps its override.
    registry
        .apply_instance(&target, &FieldCodec, &mut library, root, &SaveOptions::default())
        .unwrap();
    let mut fresh = scene();
    let asset = library.load_asset(ROOM).unwrap();
    let loaded = load(&mut fresh, &library, &asset.data, None);
    let new_bulb = bulb_of(&fresh, loaded.root);
    assert_eq!(fresh.field(new_bulb, "Intensity"), Some(&FieldValue::Float(5.0)));
    assert_eq!(fresh.field(new_bulb, "Color"), Some(&FieldValue::Text("amber".into())));
}

#[test]
fn refresh_moves_attached_actors_onto_the_new_copy() {
    let mut library = library_with_room();
    let mut target = scene();
    let mut registry = PrefabInstanceRegistry::new();
    let root = instantiate(&mut registry, &mut target, &library, ROOM);
    let old_bulb = bulb_of(&target, root);
    let sticker = spawn(&mut target, "Node", "Sticker", Some(old_bulb));

    edit_lamp(&mut library);
    registry
        .refresh_instances(&mut target, &FieldCodec, &library, LAMP, &LoadOptions::default())
        .unwrap();

    assert!(target.is_valid(sticker));
    let bulb = bulb_of(&target, root);
    assert_ne!(bulb, old_bulb);
    assert_eq!(target.attach_parent_actor(sticker), Some(bulb));
    assert_eq!(target.label(bulb).as_deref(), Some("Bulb"));
}

#[test]
fn refresh_reaches_instances_that_nest_the_asset() {
    let mut library = library_with_room();
    let mut house = scene();
    let house_root = spawn(&mut house, "Node", "House", None);
    let asset = library.load_asset(ROOM).unwrap();
    let room = load(&mut house, &library, &asset.data, Some(house_root));
    let mut subs = SubPrefabMap::new();
    subs.insert(room.root, SubPrefabData::new(ROOM, instance_map(&room.identity)));
    let saved = save(&house, house_root, &IdentityMap::new(), &subs);
    library.insert("/Game/House", saved.bytes).unwrap();

    let mut target = scene();
    let mut registry = PrefabInstanceRegistry::new();
    let root = instantiate(&mut registry, &mut target, &library, "/Game/House");
    let old_room = child(&target, root, "Room");

    edit_lamp(&mut library);
    // Unrelated assets refresh nothing.
    let none = registry
        .refresh_instances(&mut target, &FieldCodec, &library, "/Game/Other", &LoadOptions::default())
        .unwrap();
    assert!(none.is_empty());
    assert!(target.is_valid(old_room));

    let refreshed = registry
        .refresh_instances(&mut target, &FieldCodec, &library, LAMP, &LoadOptions::default())
        .unwrap();
    assert_eq!(refreshed.len(), 1);
    assert!(!target.is_valid(old_room));
    let new_room = child(&target, root, "Room");
    assert_eq!(refreshed, vec![new_room]);
    let bulb = bulb_of(&target, new_room);
    assert_eq!(target.field(bulb, "Intensity"), Some(&FieldValue::Float(5.0)));
    assert_eq!(target.field(bulb, "Color"), Some(&FieldValue::Text("amber".into())));
}

#[test]
fn unpacked_sub_prefab_is_saved_as_plain_actors() {
    let mut library = library_with_room();
    let mut target = scene();
    let mut registry = PrefabInstanceRegistry::new();
    let root = instantiate(&mut registry, &mut target, &library, ROOM);
    let lamp = child(&target, root, "Lamp");

    assert_eq!(registry.unpack_instance(&target, lamp).unwrap(), LAMP);
    assert!(registry.get(root).unwrap().sub_prefabs.is_empty());
    assert!(target.is_valid(lamp));
    assert!(matches!(
        registry.unpack_instance(&target, lamp),
        Err(PrefabError::NotSubPrefab(_))
    ));

    registry
        .apply_instance(&target, &FieldCodec, &mut library, root, &SaveOptions::default())
        .unwrap();
    let (_, data) = read_container(&library.load_asset(ROOM).unwrap().data).unwrap();
    let records = data.root.walk();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|(r, _)| !r.is_sub_prefab()));

    // The lamp no longer follows its old asset.
    edit_lamp(&mut library);
    let mut fresh = scene();
    let asset = library.load_asset(ROOM).unwrap();
    let loaded = load(&mut fresh, &library, &asset.data, None);
    let bulb = bulb_of(&fresh, loaded.root);
    assert_eq!(fresh.field(bulb, "Intensity"), Some(&FieldValue::Float(5.0)));
    assert_eq!(fresh.field(bulb, "Color"), Some(&FieldValue::Text("white".into())));
    assert!(loaded.sub_prefabs.is_empty());
}

#[test]
fn unpacking_an_instance_root_keeps_its_actors() {
    let library = library_with_room();
    let mut target = scene();
    let mut registry = PrefabInstanceRegistry::new();
    let root = instantiate(&mut registry, &mut target, &library, ROOM);
    let count = target.node_count();

    assert_eq!(registry.unpack_instance(&target, root).unwrap(), ROOM);
    assert!(registry.is_empty());
    assert_eq!(target.node_count(), count);
    assert_eq!(labels(&target, root), vec!["Lamp".to_string()]);
}

#[test]
fn cleanup_drops_entries_with_dead_roots() {
    let library = library_with_room();
    let mut target = scene();
    let mut registry = PrefabInstanceRegistry::new();
    let root = instantiate(&mut registry, &mut target, &library, ROOM);
    let lamp = child(&target, root, "Lamp");

    assert_eq!(registry.cleanup_invalid(&target), 0);
    destroy_actor_with_hierarchy(&mut target, lamp).unwrap();
    assert_eq!(registry.cleanup_invalid(&target), 1);
    assert!(registry.get(root).unwrap().sub_prefabs.is_empty());

    destroy_actor_with_hierarchy(&mut target, root).unwrap();
    assert_eq!(registry.cleanup_invalid(&target), 1);
    assert!(registry.is_empty());
}
