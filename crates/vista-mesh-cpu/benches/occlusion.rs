use criterion::{Criterion, black_box, criterion_group, criterion_main};

use vista_mesh_cpu::{FaceCullingMesher, Mesher, OcclusionScratch, compute_occlusion};
use vista_voxel::{Block, BlockClass, BlockTable, RegionCoord, VoxelSnapshot};

fn table() -> BlockTable {
    BlockTable::new()
        .with("stone", 1, BlockClass::Opaque)
        .with("water", 2, BlockClass::Translucent)
}

// Rolling hills with a water line, roughly what a surface region looks like.
fn surface_region() -> VoxelSnapshot {
    VoxelSnapshot::from_world_fn(RegionCoord::new(0, 0, 0), |x, y, z| {
        let h = 6 + ((x as f32 * 0.4).sin() * 3.0 + (z as f32 * 0.3).cos() * 3.0) as i32;
        if y <= h {
            Block::new(1)
        } else if y <= 7 {
            Block::new(2)
        } else {
            Block::AIR
        }
    })
}

fn bench_occlusion_summary(c: &mut Criterion) {
    let mut group = c.benchmark_group("occlusion_summary");
    let reg = table();
    let snap = surface_region();
    let mut scratch = OcclusionScratch::default();
    group.bench_function("surface_16", |b| {
        b.iter(|| black_box(compute_occlusion(&snap, &reg, &mut scratch)))
    });
    group.finish();
}

fn bench_face_culling(c: &mut Criterion) {
    let mut group = c.benchmark_group("face_culling_mesher");
    let reg = table();
    let snap = surface_region();
    group.bench_function("surface_16", |b| {
        b.iter(|| black_box(FaceCullingMesher.mesh(&snap, &reg)))
    });
    group.finish();
}

criterion_group!(benches, bench_occlusion_summary, bench_face_culling);
criterion_main!(benches);
