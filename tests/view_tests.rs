use mechcat::{
    Attr, BufferBundle, Error, IonBuffers, IonInfo, MechanismDecl, MechanismKind, MechanismSchema,
    PointerPack,
};

/// `e` global, `x` state, `tau` parameter.
fn leak_schema() -> MechanismSchema {
    let mut decl = MechanismDecl::new();
    decl.declare_global("e", "mV", -70.0).unwrap();
    decl.declare_state("x", "mV", 1.0).unwrap();
    decl.declare_parameter("tau", "ms", 5.0).unwrap();
    decl.finalize("leak", MechanismKind::Density).unwrap()
}

fn calcium_schema() -> MechanismSchema {
    let mut decl = MechanismDecl::new();
    decl.declare_ion(IonInfo::new("ca").verified_valence(2)).unwrap();
    decl.finalize("cad", MechanismKind::Density).unwrap()
}

#[test]
fn test_named_writes_reach_engine_buffers() {
    let schema = leak_schema();
    let x_slot = schema.state_slot("x").unwrap();

    let mut v = vec![-65.0, -60.0, -55.0, -50.0];
    let mut i = vec![0.0; 4];
    let mut g = vec![0.0; 4];
    let node_index = [3, 1];
    let mut globals = vec![-70.0];
    let mut x = vec![1.0, 1.0];
    let mut tau = vec![5.0, 5.0];
    {
        let bundle = BufferBundle {
            dt: 0.025,
            node_index: &node_index,
            v: &mut v,
            i: &mut i,
            g: &mut g,
            globals: &mut globals,
            state_vars: vec![x.as_mut_slice()],
            parameters: vec![tau.as_mut_slice()],
            ..Default::default()
        };
        let pp = PointerPack::bind(&schema, bundle).unwrap();

        assert_eq!(pp.width(), 2);
        assert_eq!(pp.scalar("dt").unwrap(), 0.025);
        assert_eq!(pp.scalar("width").unwrap(), 2.0);
        assert_eq!(pp.values("v").unwrap(), vec![-50.0, -60.0]);

        pp.assign("x", 5.0).unwrap();
        pp.assign("i", &[1.0, 2.0]).unwrap();
        pp.assign("tau", &[2.0, 3.0]).unwrap();
        pp.set_scalar("e", -80.0).unwrap();

        // Writes are visible through every handle at once.
        let by_name = pp.array("x").unwrap();
        let by_slot = pp.state(x_slot);
        by_name.set(1, 7.0);
        assert_eq!(by_slot.get(1), 7.0);
        assert_eq!(pp.scalar("e").unwrap(), -80.0);
    }
    assert_eq!(x, vec![5.0, 7.0]);
    assert_eq!(i, vec![0.0, 2.0, 0.0, 1.0]);
    assert_eq!(tau, vec![2.0, 3.0]);
    assert_eq!(globals, vec![-80.0]);
}

#[test]
fn test_node_index_is_read_only() {
    let schema = leak_schema();
    let (mut v, mut i, mut g) = (vec![0.0; 2], vec![0.0; 2], vec![0.0; 2]);
    let mut globals = vec![-70.0];
    let (mut x, mut tau) = (vec![1.0; 2], vec![5.0; 2]);
    let bundle = BufferBundle {
        node_index: &[0, 1],
        v: &mut v,
        i: &mut i,
        g: &mut g,
        globals: &mut globals,
        state_vars: vec![x.as_mut_slice()],
        parameters: vec![tau.as_mut_slice()],
        ..Default::default()
    };
    let pp = PointerPack::bind(&schema, bundle).unwrap();

    assert!(matches!(pp.attr("node_index").unwrap(), Attr::Index(&[0, 1])));
    assert!(matches!(pp.assign("node_index", 1.0), Err(Error::ReadOnlyAttribute(_))));
    assert!(matches!(pp.assign("dt", 1.0), Err(Error::ReadOnlyAttribute(_))));
    assert!(matches!(pp.set_scalar("width", 3.0), Err(Error::ReadOnlyAttribute(_))));
}

#[test]
fn test_errors_for_unknown_and_mismatched_attributes() {
    let schema = leak_schema();
    let (mut v, mut i, mut g) = (vec![0.0; 2], vec![0.0; 2], vec![0.0; 2]);
    let mut globals = vec![-70.0];
    let (mut x, mut tau) = (vec![1.0; 2], vec![5.0; 2]);
    let bundle = BufferBundle {
        node_index: &[0, 1],
        v: &mut v,
        i: &mut i,
        g: &mut g,
        globals: &mut globals,
        state_vars: vec![x.as_mut_slice()],
        parameters: vec![tau.as_mut_slice()],
        ..Default::default()
    };
    let pp = PointerPack::bind(&schema, bundle).unwrap();

    // No ions declared, so no ion attributes exist.
    assert!(matches!(pp.attr("ica"), Err(Error::UnboundAttribute { .. })));
    assert!(matches!(pp.values("index_ca"), Err(Error::UnboundAttribute { .. })));

    assert!(matches!(
        pp.assign("x", &[1.0, 2.0, 3.0]),
        Err(Error::ShapeMismatch { expected: 2, actual: 3, .. })
    ));
    assert!(matches!(
        pp.assign("e", &[1.0, 2.0]),
        Err(Error::ShapeMismatch { expected: 1, actual: 2, .. })
    ));
    assert!(pp.assign("e", &[-60.0]).is_ok());
    assert!(matches!(pp.scalar("x"), Err(Error::AttributeKind { .. })));
    assert!(matches!(pp.array("diam_um"), Err(Error::MissingBuffer(_))));
    assert!(matches!(pp.temperature_degc(), Err(Error::MissingBuffer(_))));
}

#[test]
fn test_bind_rejects_inconsistent_bundles() {
    let schema = leak_schema();
    let (mut v, mut i, mut g) = (vec![0.0; 2], vec![0.0; 2], vec![0.0; 2]);
    let mut globals = vec![-70.0];
    let mut tau = vec![5.0; 2];

    // State variable missing.
    let bundle = BufferBundle {
        node_index: &[0, 1],
        v: &mut v,
        i: &mut i,
        g: &mut g,
        globals: &mut globals,
        parameters: vec![tau.as_mut_slice()],
        ..Default::default()
    };
    assert!(matches!(
        PointerPack::bind(&schema, bundle),
        Err(Error::BundleMismatch { .. })
    ));

    // Node index past the shared arrays.
    let mut x = vec![1.0; 2];
    let bundle = BufferBundle {
        node_index: &[0, 2],
        v: &mut v,
        i: &mut i,
        g: &mut g,
        globals: &mut globals,
        state_vars: vec![x.as_mut_slice()],
        parameters: vec![tau.as_mut_slice()],
        ..Default::default()
    };
    assert!(matches!(
        PointerPack::bind(&schema, bundle),
        Err(Error::BundleMismatch { .. })
    ));
}

#[test]
fn test_ion_quantities_go_through_ion_index() {
    let schema = calcium_schema();
    let ca = schema.ion_slot("ca").unwrap();

    let (mut v, mut i, mut g) = (vec![0.0; 4], vec![0.0; 4], vec![0.0; 4]);
    let mut ica = vec![0.0; 3];
    let mut eca = vec![130.0, 131.0, 132.0];
    let mut cai = vec![1e-4, 2e-4, 3e-4];
    let charge = vec![2.0; 3];
    let index = [2, 0];
    {
        let bundle = BufferBundle {
            node_index: &[3, 1],
            v: &mut v,
            i: &mut i,
            g: &mut g,
            ions: vec![IonBuffers {
                current_density: Some(ica.as_mut_slice()),
                reversal_potential: Some(eca.as_mut_slice()),
                internal_concentration: Some(cai.as_mut_slice()),
                ionic_charge: Some(charge.as_slice()),
                index: &index,
                ..Default::default()
            }],
            ..Default::default()
        };
        let pp = PointerPack::bind(&schema, bundle).unwrap();

        assert_eq!(pp.indices("index_ca").unwrap(), &[2, 0]);
        assert_eq!(pp.values("eca").unwrap(), vec![132.0, 130.0]);
        assert_eq!(pp.values("caq").unwrap(), vec![2.0, 2.0]);
        assert_eq!(pp.ion(ca).name(), "ca");

        pp.assign("ica", &[0.5, 0.25]).unwrap();
        pp.ion(ca).internal_concentration().unwrap().set(1, 9e-4);

        assert!(matches!(pp.assign("caq", 1.0), Err(Error::ReadOnlyAttribute(_))));
        assert!(matches!(pp.assign("index_ca", 1.0), Err(Error::ReadOnlyAttribute(_))));
        assert!(matches!(pp.values("cao"), Err(Error::MissingBuffer(_))));
    }
    assert_eq!(ica, vec![0.25, 0.0, 0.5]);
    assert_eq!(cai, vec![1e-4, 9e-4, 3e-4]);
}

#[test]
fn test_ion_index_outside_ion_arrays_is_rejected() {
    let schema = calcium_schema();
    let (mut v, mut i, mut g) = (vec![0.0; 2], vec![0.0; 2], vec![0.0; 2]);
    let mut ica = vec![0.0; 1];
    let bundle = BufferBundle {
        node_index: &[0, 1],
        v: &mut v,
        i: &mut i,
        g: &mut g,
        ions: vec![IonBuffers {
            current_density: Some(ica.as_mut_slice()),
            index: &[0, 1],
            ..Default::default()
        }],
        ..Default::default()
    };
    assert!(matches!(
        PointerPack::bind(&schema, bundle),
        Err(Error::BundleMismatch { .. })
    ));
}

#[test]
fn test_environment_arrays_follow_node_index() {
    let schema = leak_schema();
    let (mut v, mut i, mut g) = (vec![0.0; 3], vec![0.0; 3], vec![0.0; 3]);
    let mut temperature = vec![6.3, 20.0, 37.0];
    let diam = vec![1.0, 2.0, 3.0];
    let mut globals = vec![-70.0];
    let (mut x, mut tau) = (vec![1.0; 2], vec![5.0; 2]);
    {
        let bundle = BufferBundle {
            node_index: &[2, 0],
            v: &mut v,
            i: &mut i,
            g: &mut g,
            temperature_degc: Some(temperature.as_mut_slice()),
            diam_um: Some(diam.as_slice()),
            globals: &mut globals,
            state_vars: vec![x.as_mut_slice()],
            parameters: vec![tau.as_mut_slice()],
            ..Default::default()
        };
        let pp = PointerPack::bind(&schema, bundle).unwrap();
        assert_eq!(pp.values("diam_um").unwrap(), vec![3.0, 1.0]);
        assert!(matches!(pp.assign("diam_um", 1.0), Err(Error::ReadOnlyAttribute(_))));
        pp.assign("temperature_degC", 25.0).unwrap();
    }
    assert_eq!(temperature, vec![25.0, 20.0, 25.0]);
}
