//! Batch enrollment of every identity an image source knows about.

use crate::enroll::EnrollmentService;
use crate::source::{ImageSource, SourceError};
use crate::types::Detector;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub attempted: usize,
    pub enrolled: usize,
    /// `(label, reason)` for each identity that failed.
    pub failures: Vec<(String, String)>,
}

pub struct BulkEnrollment<'a> {
    service: &'a EnrollmentService,
}

impl<'a> BulkEnrollment<'a> {
    pub fn new(service: &'a EnrollmentService) -> Self {
        Self { service }
    }

    /// Enroll each identity from `source` in turn. Per-identity failures are
    /// recorded in the report; only a failure to list the source is an error.
    pub fn run<D, S>(&self, detector: &mut D, source: &S) -> Result<BulkReport, SourceError>
    where
        D: Detector + ?Sized,
        S: ImageSource + ?Sized,
    {
        let identities = source.identities()?;
        let mut report = BulkReport::default();

        for entry in identities {
            report.attempted += 1;
            match self.service.add_person(detector, &entry.label, &entry.images) {
                Ok(_) => report.enrolled += 1,
                Err(e) => report.failures.push((entry.label, e.to_string())),
            }
        }

        tracing::info!(
            attempted = report.attempted,
            enrolled = report.enrolled,
            failed = report.failures.len(),
            "bulk enrollment finished"
        );

        Ok(report)
    }
}
