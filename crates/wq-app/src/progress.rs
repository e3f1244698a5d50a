use wq_batch::BatchProgress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    LoadingStudy,
    ReadingBaseline,
    BuildingProblem,
    SamplingDesign,
    EvaluatingRows,
    AssemblingArtifact,
    SavingArtifact,
    Completed,
}

impl RunStage {
    pub fn label(self) -> &'static str {
        match self {
            RunStage::LoadingStudy => "loading study",
            RunStage::ReadingBaseline => "reading baseline",
            RunStage::BuildingProblem => "building problem",
            RunStage::SamplingDesign => "sampling design",
            RunStage::EvaluatingRows => "evaluating rows",
            RunStage::AssemblingArtifact => "assembling artifact",
            RunStage::SavingArtifact => "saving artifact",
            RunStage::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunProgressEvent {
    pub stage: RunStage,
    pub elapsed_wall_s: f64,
    pub message: Option<String>,
    pub batch: Option<BatchProgress>,
}

impl RunProgressEvent {
    pub fn stage(stage: RunStage, elapsed_wall_s: f64, message: Option<String>) -> Self {
        Self {
            stage,
            elapsed_wall_s,
            message,
            batch: None,
        }
    }
}
