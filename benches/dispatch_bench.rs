use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mechcat::{
    BufferBundle, Callbacks, CellGroup, Host, HostConfig, IonInfo, Mechanism, MechanismDecl,
    MechanismKind, Phase,
};
use std::sync::Arc;
use std::time::Duration;

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Leak current through slot access plus a relaxing state variable.
fn leak_by_slot() -> Arc<Mechanism> {
    let mut decl = MechanismDecl::new();
    let e = decl.declare_global("e", "mV", -70.0).unwrap();
    let gl = decl.declare_parameter("gl", "S/cm2", 0.001).unwrap();
    let x = decl.declare_state("x", "", 0.0).unwrap();
    let schema = decl.finalize("leak_slot", MechanismKind::Density).unwrap();
    let callbacks = Callbacks::new()
        .on_advance_state(move |pp| {
            let (x, dt, e) = (pp.state(x), pp.dt(), pp.global(e));
            for k in 0..pp.width() {
                x.update(k, |x| x + (e - x) * dt);
            }
            Ok(())
        })
        .on_compute_currents(move |pp| {
            let (v, i, gl, e) = (pp.v(), pp.i(), pp.parameter(gl), pp.global(e));
            for (k, &node) in pp.node_index().iter().enumerate() {
                let node = node as usize;
                i.update(node, |i| i + gl.get(k) * (v.get(node) - e));
            }
            Ok(())
        });
    Arc::new(Mechanism::new(schema, callbacks))
}

/// The same model through the by-name API.
fn leak_by_name() -> Arc<Mechanism> {
    let mut decl = MechanismDecl::new();
    decl.declare_global("e", "mV", -70.0).unwrap();
    decl.declare_parameter("gl", "S/cm2", 0.001).unwrap();
    decl.declare_state("x", "", 0.0).unwrap();
    let schema = decl.finalize("leak_name", MechanismKind::Density).unwrap();
    let callbacks = Callbacks::new().on_compute_currents(|pp| {
        let v = pp.values("v")?;
        let gl = pp.values("gl")?;
        let e = pp.scalar("e")?;
        let i: Vec<f64> = v.iter().zip(&gl).map(|(v, g)| g * (v - e)).collect();
        pp.assign("i", &i)?;
        Ok(())
    });
    Arc::new(Mechanism::new(schema, callbacks))
}

fn calcium() -> Arc<Mechanism> {
    let mut decl = MechanismDecl::new();
    decl.declare_ion(IonInfo::new("ca").verified_valence(2)).unwrap();
    let schema = decl.finalize("ca_flux", MechanismKind::Density).unwrap();
    let callbacks = Callbacks::new().on_compute_currents(|pp| {
        pp.assign("ica", 0.1)?;
        Ok(())
    });
    Arc::new(Mechanism::new(schema, callbacks))
}

fn make_group(n: usize) -> CellGroup {
    let nodes: Vec<i32> = (0..n as i32).collect();
    let odd: Vec<i32> = nodes.iter().copied().filter(|k| k % 2 == 1).collect();
    let mut group = CellGroup::new(n, &HostConfig::default());
    group.place(leak_by_slot(), &nodes).unwrap();
    group.place(calcium(), &odd).unwrap();
    group.init().unwrap();
    group
}

// ── Benchmarks ───────────────────────────────────────────────────────────────

fn bench_invoke(c: &mut Criterion) {
    let mut group = c.benchmark_group("invoke");
    group.measurement_time(Duration::from_secs(3));

    for &width in &[64usize, 1024] {
        let node_index: Vec<i32> = (0..width as i32).rev().collect();
        let mut v = vec![-65.0; width];
        let mut i = vec![0.0; width];
        let mut g = vec![0.0; width];
        let mut globals = vec![-70.0];
        let mut gl = vec![0.001; width];
        let mut x = vec![0.0; width];

        for (label, mechanism) in [("slot", leak_by_slot()), ("name", leak_by_name())] {
            group.bench_function(&format!("{}_{}", label, width), |b| {
                b.iter(|| {
                    let bundle = BufferBundle {
                        dt: 0.025,
                        node_index: &node_index,
                        v: &mut v,
                        i: &mut i,
                        g: &mut g,
                        globals: &mut globals,
                        state_vars: vec![x.as_mut_slice()],
                        parameters: vec![gl.as_mut_slice()],
                        ..Default::default()
                    };
                    mechanism.invoke(Phase::ComputeCurrents, bundle).unwrap();
                    black_box(&i);
                });
            });
        }
    }
    group.finish();
}

fn bench_group_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_step");
    group.measurement_time(Duration::from_secs(3));

    for &n in &[256usize, 4096] {
        let mut cells = make_group(n);
        group.bench_function(&format!("{}_compartments", n), |b| {
            b.iter(|| {
                cells.step(0.025).unwrap();
                black_box(cells.current());
            });
        });
    }
    group.finish();
}

fn bench_host_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_step");
    group.measurement_time(Duration::from_secs(3));

    let mut host = Host::new(HostConfig::default());
    for _ in 0..8 {
        let k = host.add_group(1024);
        let nodes: Vec<i32> = (0..1024).collect();
        host.group_mut(k)
            .unwrap()
            .place(leak_by_slot(), &nodes)
            .unwrap();
    }
    host.init().unwrap();
    group.bench_function("8x1024", |b| {
        b.iter(|| host.step(0.025).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_invoke, bench_group_step, bench_host_step);
criterion_main!(benches);
