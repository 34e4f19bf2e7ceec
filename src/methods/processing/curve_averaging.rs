use std::collections::BTreeMap;

use log::info;

use crate::config::Config;
use crate::curve::CurveData;
use crate::kernels::math::mean;
use crate::method::{
    ensure_completed, integrity, Method, MethodContext, MethodKind, MethodRun, StepDescriptor,
    EXPORT_KEY,
};
use crate::steps::{stored, TagCurves};
use crate::store::CurveDataId;
use crate::{Error, Result};

/// Replace each group of identically tagged curves by their point-wise mean.
///
/// The tags name curves of one dataset, so the method cannot be applied to another.
#[derive(Clone, Copy, Debug, Default)]
pub struct CurveAveraging;

fn average(group: &[CurveData]) -> Result<Vec<f64>> {
    let length = integrity::uniform_length(group)?;
    Ok((0..length)
        .map(|i| mean(&group.iter().map(|c| c.current()[i]).collect::<Vec<_>>()))
        .collect())
}

impl Method for CurveAveraging {
    fn key(&self) -> &'static str {
        "curve_averaging"
    }

    fn display_name(&self) -> &'static str {
        "Curve averaging"
    }

    fn kind(&self) -> MethodKind {
        MethodKind::Processing
    }

    fn steps(&self, _config: &Config) -> Vec<StepDescriptor> {
        vec![StepDescriptor::new(
            "Tag curves",
            "Give curves to be averaged together the same tag, \
             untagged curves are kept as they are.",
            TagCurves,
        )]
    }

    fn check_integrity(&self, ctx: &MethodContext<'_>) -> Result<()> {
        super::check_members(ctx)
    }

    fn finalize(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        let groups: BTreeMap<String, Vec<CurveDataId>> = stored(&ctx.run, TagCurves::KIND)?;
        let mut columns = vec![];
        let mut first_potential = None;
        for (tag, ids) in &groups {
            let group = ids
                .iter()
                .map(|id| {
                    if ctx.dataset.members().contains(id) {
                        ctx.curve_data(*id)
                    } else {
                        Err(Error::computation(format!("{id} is no longer part of the dataset")))
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            let Some(first) = group.first() else {
                continue;
            };
            let mut averaged = first.get_copy(ctx.next_curve_data_id());
            averaged.set_current(average(&group)?)?;
            columns.push(averaged.current().to_vec());
            first_potential.get_or_insert_with(|| first.potential().to_vec());

            ctx.replace_member(first.id, averaged)?;
            for other in &group[1..] {
                ctx.dataset.remove_curve(other.id)?;
            }
            info!("averaged {} curves tagged {tag}", group.len());
        }

        let rows = crate::methods::point_rows(&first_potential.unwrap_or_default(), &columns);
        ctx.run.set_custom(EXPORT_KEY, &rows)?;
        ctx.run.set_custom(super::PROCESSED_KEY, &groups.values().map(Vec::len).sum::<usize>())?;
        ctx.run.set_custom("groups", &groups.len())?;
        Ok(())
    }

    fn final_content(&self, run: &MethodRun) -> Result<String> {
        ensure_completed(run)?;
        let count: usize = run.custom(super::PROCESSED_KEY)?;
        let groups: usize = run.custom("groups")?;
        Ok(format!("Curve averaging merged {count} curves into {groups} averages."))
    }
}
