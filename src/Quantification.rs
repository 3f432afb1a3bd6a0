/// Detected peaks of one experiment, their ingestion from the instrument blob
/// table and the join against the reference database. Split peaks of one
/// compound are merged here before quantification.
pub mod peak_table;
/// Experimental matrix: sample mass, internal standard, temperature and the
/// cup weighings used for the char yield of every experiment.
pub mod experiments;
/// Quantification engine. Converts peak volumes into moles (ECN and MRF
/// based), mass and mass yield relative to a reference compound, either an
/// internal standard weighed into the sample or an externally calibrated one.
///
///  # Examples
/// ```
/// use PyroQuant::Quantification::experiments::ExperimentRecord;
/// use PyroQuant::Quantification::peak_table::{PeakRecord, PeakTable};
/// use PyroQuant::Quantification::yields::compute_yields_is;
/// let peaks = PeakTable::new(vec![
///     PeakRecord::with_parameters("fluoranthene", 100.0, 200.0, 10.0, 1.0),
///     PeakRecord::with_parameters("phenol", 50.0, 100.0, 5.0, 0.5),
/// ]);
/// let experiment = ExperimentRecord::new("run_1", 50.0).with_is_amount(10.0);
/// let yields = compute_yields_is(&experiment, &peaks, "fluoranthene").unwrap();
/// assert!((yields.get("phenol").unwrap().yield_mrf - 10.0).abs() < 1e-9);
/// ```
pub mod yields;
/// group, element and molecular-weight-range totals; cross-experiment comparison
pub mod summary;
/// External calibration: proportional fit through the origin with iterative
/// outlier rejection, persisted as slope plus confidence interval.
///
///  # Examples
/// ```
/// use PyroQuant::Quantification::calibration::{CalibrationBuilder, CalibrationDataset};
/// let points = [(1.0, 3.01), (2.0, 5.98), (3.0, 9.02), (4.0, 11.99)];
/// let dataset = CalibrationDataset::from_pairs(&points);
/// let fit = CalibrationBuilder::default().fit(&dataset, &[]).unwrap();
/// println!("slope {} CI {:?}", fit.model.slope, fit.model.conf_interval);
/// ```
pub mod calibration;
/// batch driver: every experiment of the matrix from peak file to result files
pub mod pipeline;
