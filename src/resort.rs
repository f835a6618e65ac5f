use std::sync::Arc;

use vista_runtime::Diagnostics;

use crate::build::{BuildScheduler, BuildShared, StagedPass, UploadTarget};
use crate::region::{Pass, Region, RegionBuildState};

/// Queues a resort for every region in `visible` that holds translucent geometry sorted
/// for an older position version.
pub fn schedule(visible: &[Arc<Region>], position_version: u64, scheduler: &BuildScheduler) -> usize {
    let mut n = 0;
    for r in visible {
        if r.is_closed() || r.resort_position_version() == position_version {
            continue;
        }
        if r.build_state().translucent.is_none() {
            continue;
        }
        if scheduler.schedule_resort(r) {
            n += 1;
        }
    }
    n
}

/// Worker side: reorders translucent quads for the current camera and uploads them in
/// place of the translucent pass. The mesher does not run.
pub(crate) fn run(region: &Arc<Region>, shared: &BuildShared, epoch: u64) {
    let position_version = shared.visibility.position_version();
    let state = region.build_state();
    let Some(current) = state.translucent.as_ref() else {
        return;
    };
    if region.resort_position_version() == position_version {
        return;
    }

    let saved = current.save_order();
    let Some(loaded) = current.with_saved_order(&saved) else {
        debug_assert!(false, "saved translucent order did not reload");
        return;
    };
    let camera_local = shared.visibility.camera_position() - region.origin();
    let sorted = loaded.sorted_for(camera_local);
    if sorted.order() == current.order() {
        region.set_resort_position_version(position_version);
        return;
    }

    let staged = match StagedPass::stage(&shared.allocator, &sorted.ordered_mesh()) {
        Ok(s) => s,
        Err(e) => {
            shared.diag.builds_failed.inc();
            log::warn!(target: "build", "{:?}: resort failed: {e}", region.coord());
            return;
        }
    };
    let next = Arc::new(RegionBuildState {
        translucent: Some(sorted),
        ..RegionBuildState::clone(&state)
    });
    if region.is_cancelled(epoch) || !region.replace_build_state_if(&state, next) {
        if let Some(s) = staged {
            s.discard(&shared.allocator);
        }
        return;
    }
    region.set_resort_position_version(position_version);
    shared.diag.resorts.inc();
    log::trace!(target: "build", "{:?}: resorted for position v{position_version}", region.coord());

    let region = Arc::clone(region);
    let allocator = Arc::clone(&shared.allocator);
    let buffers = Arc::clone(&shared.buffers);
    let diag: Arc<Diagnostics> = Arc::clone(&shared.diag);
    shared.uploads.push(Box::new(move |gpu: &mut UploadTarget| {
        if region.is_cancelled(epoch) {
            if let Some(s) = staged {
                s.discard(&allocator);
            }
            return;
        }
        StagedPass::install(staged, gpu, &region, Pass::Translucent, &allocator, &buffers);
        diag.uploads.inc();
    }));
}
