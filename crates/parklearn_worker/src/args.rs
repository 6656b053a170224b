//! Positional argument vector passed to the detection executable.
//!
//! The executable reads its inputs by position only, so slot order is a
//! protocol. Bump [`ARGUMENT_PROTOCOL_VERSION`] whenever it changes.

use crate::params::JobParameters;
use crate::paths::ResolvedInputs;
use std::path::Path;

pub const ARGUMENT_PROTOCOL_VERSION: u32 = 1;
pub const ARGUMENT_COUNT: usize = 8;

/// Position of each argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSlot {
    LearningRate = 0,
    Iterations = 1,
    VarThreshold = 2,
    ProjectId = 3,
    LearningPath = 4,
    TestPath = 5,
    RoiPath = 6,
    OutputDir = 7,
}

impl ArgSlot {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Build the argument vector for one run.
///
/// Reals use six decimal places, integers plain decimal. In live mode
/// `inputs.test` already points at the live frame folder.
pub fn build_arguments(
    params: &JobParameters,
    inputs: &ResolvedInputs,
    output_dir: &Path,
) -> Vec<String> {
    vec![
        format!("{:.6}", params.learning_rate),
        params.iterations.to_string(),
        format!("{:.6}", params.var_threshold),
        params.project_id.clone(),
        path_arg(&inputs.learning),
        path_arg(&inputs.test),
        path_arg(&inputs.roi),
        path_arg(output_dir),
    ]
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::JobMode;
    use std::path::PathBuf;

    fn params() -> JobParameters {
        JobParameters {
            project_id: "lot-7".to_string(),
            learning_rate: 0.01,
            iterations: 500,
            var_threshold: 16.0,
            learning_path: "day1".to_string(),
            roi_path: "roi.json".to_string(),
            mode: JobMode::Batch {
                test_path: "day2".to_string(),
            },
        }
    }

    fn inputs() -> ResolvedInputs {
        ResolvedInputs {
            executable: PathBuf::from("/opt/detector/main"),
            learning: PathBuf::from("/s/lot-7/uploads/learningImages/day1"),
            test: PathBuf::from("/s/lot-7/uploads/testImages/day2"),
            roi: PathBuf::from("/s/lot-7/uploads/roi/roi.json"),
        }
    }

    #[test]
    fn test_fixed_order_and_formatting() {
        let args = build_arguments(&params(), &inputs(), Path::new("/s/lot-7/results/T1"));

        assert_eq!(args.len(), ARGUMENT_COUNT);
        assert_eq!(
            args,
            vec![
                "0.010000",
                "500",
                "16.000000",
                "lot-7",
                "/s/lot-7/uploads/learningImages/day1",
                "/s/lot-7/uploads/testImages/day2",
                "/s/lot-7/uploads/roi/roi.json",
                "/s/lot-7/results/T1",
            ]
        );
    }

    #[test]
    fn test_changing_roi_changes_only_its_slot() {
        let out = Path::new("/s/lot-7/results/T1");
        let before = build_arguments(&params(), &inputs(), out);

        let mut other = inputs();
        other.roi = PathBuf::from("/s/lot-7/uploads/roi/other.json");
        let after = build_arguments(&params(), &other, out);

        let changed: Vec<usize> = (0..ARGUMENT_COUNT)
            .filter(|&i| before[i] != after[i])
            .collect();
        assert_eq!(changed, vec![ArgSlot::RoiPath.index()]);
    }

    #[test]
    fn test_live_mode_uses_live_folders() {
        let mut p = params();
        p.mode = JobMode::Live;
        let mut live = inputs();
        live.test = PathBuf::from("/s/live/currentImages");

        let args = build_arguments(&p, &live, Path::new("/s/lot-7/liveResults"));
        assert_eq!(args[ArgSlot::TestPath.index()], "/s/live/currentImages");
        assert_eq!(args[ArgSlot::OutputDir.index()], "/s/lot-7/liveResults");
    }
}
