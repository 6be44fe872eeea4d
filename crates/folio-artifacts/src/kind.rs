//! Artifact kinds.

use std::fmt;
use std::str::FromStr;

use folio_workflow::PipelineStage;
use serde::{Deserialize, Serialize};

/// What an artifact is. Each kind is produced by exactly one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    // Editing
    Chapter,
    ReleaseNotes,
    PrintHtml,
    WebHtml,
    PdfDraft,
    // PDF production
    PdfDigital,
    PdfPrint,
    LayoutPlan,
    DesignPlan,
    // Publication
    Deployment,
    QaReport,
    MarketingCopy,
    Announcement,
    // Playtesting
    PlaytestSession,
    PlaytestAnalysis,
    PlaytestFeedback,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 16] = [
        ArtifactKind::Chapter,
        ArtifactKind::ReleaseNotes,
        ArtifactKind::PrintHtml,
        ArtifactKind::WebHtml,
        ArtifactKind::PdfDraft,
        ArtifactKind::PdfDigital,
        ArtifactKind::PdfPrint,
        ArtifactKind::LayoutPlan,
        ArtifactKind::DesignPlan,
        ArtifactKind::Deployment,
        ArtifactKind::QaReport,
        ArtifactKind::MarketingCopy,
        ArtifactKind::Announcement,
        ArtifactKind::PlaytestSession,
        ArtifactKind::PlaytestAnalysis,
        ArtifactKind::PlaytestFeedback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Chapter => "chapter",
            ArtifactKind::ReleaseNotes => "release_notes",
            ArtifactKind::PrintHtml => "print_html",
            ArtifactKind::WebHtml => "web_html",
            ArtifactKind::PdfDraft => "pdf_draft",
            ArtifactKind::PdfDigital => "pdf_digital",
            ArtifactKind::PdfPrint => "pdf_print",
            ArtifactKind::LayoutPlan => "layout_plan",
            ArtifactKind::DesignPlan => "design_plan",
            ArtifactKind::Deployment => "deployment",
            ArtifactKind::QaReport => "qa_report",
            ArtifactKind::MarketingCopy => "marketing_copy",
            ArtifactKind::Announcement => "announcement",
            ArtifactKind::PlaytestSession => "playtest_session",
            ArtifactKind::PlaytestAnalysis => "playtest_analysis",
            ArtifactKind::PlaytestFeedback => "playtest_feedback",
        }
    }

    /// The stage that produces this kind.
    pub fn stage(&self) -> PipelineStage {
        use ArtifactKind::*;
        match self {
            Chapter | ReleaseNotes | PrintHtml | WebHtml | PdfDraft => PipelineStage::W1Editing,
            PdfDigital | PdfPrint | LayoutPlan | DesignPlan => PipelineStage::W2Pdf,
            Deployment | QaReport | MarketingCopy | Announcement => PipelineStage::W3Publication,
            PlaytestSession | PlaytestAnalysis | PlaytestFeedback => PipelineStage::W4Playtesting,
        }
    }

    /// Kinds produced by `stage`, in declaration order.
    pub fn produced_by(stage: PipelineStage) -> Vec<ArtifactKind> {
        Self::ALL
            .into_iter()
            .filter(|kind| kind.stage() == stage)
            .collect()
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown artifact type '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_stage_produces_kinds() {
        let total: usize = PipelineStage::ALL
            .into_iter()
            .map(|stage| ArtifactKind::produced_by(stage).len())
            .sum();
        assert_eq!(total, ArtifactKind::ALL.len());
        assert_eq!(ArtifactKind::produced_by(PipelineStage::W1Editing).len(), 5);
        assert_eq!(
            ArtifactKind::produced_by(PipelineStage::W4Playtesting),
            vec![
                ArtifactKind::PlaytestSession,
                ArtifactKind::PlaytestAnalysis,
                ArtifactKind::PlaytestFeedback
            ]
        );
    }

    #[test]
    fn test_stage_of_kind() {
        assert_eq!(ArtifactKind::PrintHtml.stage(), PipelineStage::W1Editing);
        assert_eq!(ArtifactKind::DesignPlan.stage(), PipelineStage::W2Pdf);
        assert_eq!(ArtifactKind::QaReport.stage(), PipelineStage::W3Publication);
    }

    #[test]
    fn test_parse_and_serde_agree() {
        for kind in ArtifactKind::ALL {
            assert_eq!(kind.as_str().parse::<ArtifactKind>().unwrap(), kind);
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.as_str());
        }
        assert!("ebook".parse::<ArtifactKind>().is_err());
    }
}
