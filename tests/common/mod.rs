#![allow(dead_code)]

use std::collections::BTreeMap;

use object_model::{ClassDescriptor, FieldCodec, FieldValue, Guid, NodeId, NodeKind, ObjectModel, SceneWorld, WorldId};
use prefab::{
    load_prefab, save_prefab, IdentityMap, LoadOptions, LoadedPrefab, PrefabAssetSource, PrefabLibrary,
    SaveOptions, SavedPrefab, SubPrefabData, SubPrefabMap,
};

pub const W: WorldId = WorldId(0);
pub const LAMP: &str = "/Game/Props/Lamp";
pub const ROOM: &str = "/Game/Rooms/Room";

pub fn scene() -> SceneWorld {
    lprefab::init_logging();
    let mut scene = SceneWorld::new();
    scene.register_class(
        ClassDescriptor::new("Node")
            .with_subobject("Root", "SceneComponent", NodeKind::SceneComponent)
            .with_root("Root"),
    );
    scene.register_class(
        ClassDescriptor::new("Lamp")
            .with_subobject("Root", "SceneComponent", NodeKind::SceneComponent)
            .with_root("Root")
            .with_overridable(&["Intensity", "Color"]),
    );
    scene
}

pub fn spawn(scene: &mut SceneWorld, class: &str, label: &str, parent: Option<NodeId>) -> NodeId {
    let actor = scene.spawn_actor(W, class, label).unwrap();
    if let Some(parent) = parent {
        scene.attach_actor(actor, parent).unwrap();
    }
    actor
}

pub fn save(scene: &SceneWorld, root: NodeId, identity: &IdentityMap, subs: &SubPrefabMap) -> SavedPrefab {
    save_prefab(scene, &FieldCodec, root, identity, subs, &SaveOptions::default()).unwrap()
}

pub fn load(scene: &mut SceneWorld, assets: &dyn PrefabAssetSource, bytes: &[u8], parent: Option<NodeId>) -> LoadedPrefab {
    load_prefab(scene, &FieldCodec, assets, bytes, parent, W, &LoadOptions::default()).unwrap()
}

pub fn instance_map(identity: &IdentityMap) -> BTreeMap<Guid, NodeId> {
    identity.entries().into_iter().map(|(node, guid)| (guid, node)).collect()
}

pub fn child(scene: &SceneWorld, parent: NodeId, label: &str) -> NodeId {
    scene
        .attached_actors(parent)
        .into_iter()
        .find(|&c| scene.label(c).as_deref() == Some(label))
        .unwrap()
}

pub fn labels(scene: &SceneWorld, parent: NodeId) -> Vec<String> {
    scene
        .attached_actors(parent)
        .into_iter()
        .map(|c| scene.label(c).unwrap())
        .collect()
}

/// Lamp prefab: a `Lamp` actor with an attached `Bulb` (intensity 1, white).
pub fn author_lamp(library: &mut PrefabLibrary) {
    let mut scene = scene();
    let lamp = spawn(&mut scene, "Lamp", "Lamp", None);
    let bulb = spawn(&mut scene, "Lamp", "Bulb", Some(lamp));
    scene.set_field(lamp, "Intensity", FieldValue::Float(0.5)).unwrap();
    scene.set_field(bulb, "Intensity", FieldValue::Float(1.0)).unwrap();
    scene.set_field(bulb, "Color", FieldValue::Text("white".into())).unwrap();
    let saved = save(&scene, lamp, &IdentityMap::new(), &SubPrefabMap::new());
    library.insert(LAMP, saved.bytes).unwrap();
}

/// A room actor holding one instance of the lamp prefab.
pub struct Room {
    pub scene: SceneWorld,
    pub root: NodeId,
    pub lamp: NodeId,
    pub bulb: NodeId,
    pub subs: SubPrefabMap,
}

impl Room {
    pub fn new(library: &PrefabLibrary) -> Self {
        let mut scene = scene();
        let root = spawn(&mut scene, "Node", "Room", None);
        let asset = library.load_asset(LAMP).unwrap();
        let loaded = load(&mut scene, library, &asset.data, Some(root));
        let lamp = loaded.root;
        let bulb = child(&scene, lamp, "Bulb");
        let mut subs = SubPrefabMap::new();
        subs.insert(lamp, SubPrefabData::new(LAMP, instance_map(&loaded.identity)));
        Self {
            scene,
            root,
            lamp,
            bulb,
            subs,
        }
    }

    pub fn instance(&mut self) -> &mut SubPrefabData {
        self.subs.get_mut(&self.lamp).unwrap()
    }

    /// Give the bulb an overridden intensity.
    pub fn override_intensity(&mut self, value: f64) {
        self.scene
            .set_field(self.bulb, "Intensity", FieldValue::Float(value))
            .unwrap();
        let bulb = self.bulb;
        let data = self.subs.get_mut(&self.lamp).unwrap();
        data.add_override(&self.scene, bulb, "Intensity").unwrap();
    }

    pub fn save(&self) -> SavedPrefab {
        save(&self.scene, self.root, &IdentityMap::new(), &self.subs)
    }
}
