use mechcat::{
    Binding, Builtin, Error, IonInfo, IonQuantity, MechanismDecl, MechanismKind,
    SchemaDescription, SchemaError,
};

#[test]
fn test_indices_follow_declaration_order_per_category() {
    let mut decl = MechanismDecl::new();
    let e = decl.declare_global("e", "mV", -70.0).unwrap();
    let x = decl.declare_state("x", "mV", 1.0).unwrap();
    let gbar = decl.declare_global("gbar", "S/cm2", 0.001).unwrap();
    let y = decl.declare_state("y", "", 0.0).unwrap();
    let tau = decl.declare_parameter("tau", "ms", 5.0).unwrap();
    let ca = decl.declare_ion(IonInfo::new("ca")).unwrap();
    let k = decl.declare_ion(IonInfo::new("k")).unwrap();

    assert_eq!(e.get(), 0);
    assert_eq!(gbar.get(), 1);
    assert_eq!(x.get(), 0);
    assert_eq!(y.get(), 1);
    assert_eq!(tau.get(), 0);
    assert_eq!(ca.get(), 0);
    assert_eq!(k.get(), 1);

    let schema = decl.finalize("leaky", MechanismKind::Density).unwrap();
    assert_eq!(schema.global_slot("gbar"), Some(gbar));
    assert_eq!(schema.state_slot("y"), Some(y));
    assert_eq!(schema.parameter_slot("tau"), Some(tau));
    assert_eq!(schema.ion_slot("k"), Some(k));
    assert_eq!(schema.lookup("eca"), Some(Binding::Ion(ca, IonQuantity::ReversalPotential)));
    assert_eq!(schema.lookup("index_k"), Some(Binding::Ion(k, IonQuantity::Index)));
    assert_eq!(schema.lookup("v"), Some(Binding::Builtin(Builtin::V)));
    assert_eq!(schema.lookup("nope"), None);
}

#[test]
fn test_duplicate_field_across_categories() {
    let mut decl = MechanismDecl::new();
    decl.declare_global("x", "", 0.0).unwrap();
    let err = decl.declare_state("x", "", 0.0).unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::DuplicateField(ref name)) if name == "x"));
}

#[test]
fn test_ion_names_collide_with_fields() {
    let mut decl = MechanismDecl::new();
    decl.declare_state("cai", "mM", 0.0).unwrap();
    let err = decl.declare_ion(IonInfo::new("ca")).unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::DuplicateField(ref name)) if name == "cai"));

    // The failed declaration claims nothing.
    assert!(decl.declare_global("eca", "mV", 0.0).is_ok());
}

#[test]
fn test_ion_whose_derived_names_collide() {
    // `i` + "i" and "i" + `i` both spell `ii`.
    let mut decl = MechanismDecl::new();
    let err = decl.declare_ion(IonInfo::new("i")).unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::DuplicateField(ref name)) if name == "ii"));

    // Nothing was claimed, so the next ion still gets slot 0.
    let ca = decl.declare_ion(IonInfo::new("ca")).unwrap();
    assert_eq!(ca.get(), 0);
    let schema = decl.finalize("ok", MechanismKind::Density).unwrap();
    assert!(schema.lookup("ii").is_none());
}

#[test]
fn test_same_ion_declared_twice() {
    let mut decl = MechanismDecl::new();
    decl.declare_ion(IonInfo::new("ca")).unwrap();
    let err = decl.declare_ion(IonInfo::new("ca")).unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::DuplicateField(ref name)) if name == "ica"));
}

#[test]
fn test_builtin_names_are_reserved() {
    let mut decl = MechanismDecl::new();
    for name in ["v", "i", "g", "node_index", "dt", "width", "temperature_degC"] {
        let err = decl.declare_state(name, "", 0.0).unwrap_err();
        assert!(
            matches!(err, Error::Schema(SchemaError::ReservedName(_))),
            "{} should be reserved",
            name
        );
    }
}

#[test]
fn test_zero_verified_valence_is_malformed() {
    let mut decl = MechanismDecl::new();
    let err = decl.declare_ion(IonInfo::new("cl").verified_valence(0)).unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::Malformed(_))));
}

#[test]
fn test_field_ranges_and_flags_survive_finalize() {
    let mut decl = MechanismDecl::new();
    decl.declare_parameter_in("gbar", "S/cm2", 0.5, (0.0, 1.0)).unwrap();
    assert!(decl.declare_parameter_in("gk", "S/cm2", 2.0, (0.0, 1.0)).is_err());
    decl.declare_random("w", 0).unwrap();
    decl.set_linear(true);
    let schema = decl.finalize("noisy", MechanismKind::Point).unwrap();

    assert_eq!(schema.kind(), MechanismKind::Point);
    assert!(schema.is_linear());
    assert!(!schema.has_post_events());
    assert_eq!(schema.parameters()[0].range, (0.0, 1.0));
    assert_eq!(schema.random_variables()[0].name, "w");
    assert!(schema.attribute_names().any(|n| n == "w"));
}

#[test]
fn test_description_from_json() {
    let json = r#"{
        "name": "dummy",
        "kind": "point",
        "globals": [["e", "mV", -70.0]],
        "state_vars": [{ "name": "x", "unit": "mV", "default": 1.0, "range": [-100.0, 100.0] }],
        "ions": [{ "name": "ca", "verify_valence": true, "expected_valence": 2 }]
    }"#;
    let description = SchemaDescription::from_json(json).unwrap();
    let schema = description.declare().unwrap();

    assert_eq!(schema.name(), "dummy");
    assert_eq!(schema.kind(), MechanismKind::Point);
    assert_eq!(schema.globals()[0].default, -70.0);
    assert_eq!(schema.state_vars()[0].range, (-100.0, 100.0));
    let ca = &schema.ions()[0];
    assert!(ca.verify_valence);
    assert_eq!(ca.expected_valence, 2);
    // Flags left out keep the engine defaults.
    assert!(ca.write_int_concentration);
    assert!(ca.read_rev_potential);
}

#[test]
fn test_description_with_bad_tuple_is_malformed() {
    let json = r#"{ "name": "dummy", "globals": [["e", -70.0]] }"#;
    let err = SchemaDescription::from_json(json).unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::Malformed(_))));
}

#[test]
fn test_description_duplicate_goes_through_registry() {
    let json = r#"{ "name": "dummy", "globals": [["x", "", 0.0]], "state_vars": [["x", "", 0.0]] }"#;
    let err = SchemaDescription::from_json(json).unwrap().declare().unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::DuplicateField(_))));
}
