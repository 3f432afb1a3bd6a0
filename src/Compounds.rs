/// Module to count atoms in a molecular formula and compute its molar mass
///
///  # Examples
/// ```
/// use PyroQuant::Compounds::molmass::{calculate_molar_mass, count_atom};
/// assert_eq!(count_atom("C15H10", "C"), 15);
/// assert_eq!(count_atom("CHO2", "o"), 2);
/// let (molar_mass, composition) = calculate_molar_mass("C6H6O").unwrap();
/// println!("Element counts: {:?}", composition);
/// println!("Molar mass: {:?} g/mol", molar_mass);
/// ```
pub mod molmass;
/// reference database of named compounds: elemental counts, ECN, MRF and group tags
/// derived once from a molecular formula
///
///  # Examples
/// ```
/// use PyroQuant::Compounds::reference_db::ReferenceDatabase;
/// use PyroQuant::Utils::table::RawTable;
/// use PyroQuant::settings::ResponseFactorModel;
/// let table = RawTable::from_rows(
///     &["compound", "mw", "formula", "n_benz"],
///     &[&["Phenol", "94.11", "C6H6O", "1"]],
/// );
/// let db = ReferenceDatabase::build(&table, &ResponseFactorModel::default()).unwrap();
/// let phenol = db.lookup("phenol").unwrap();
/// assert_eq!(phenol.ecn, 6);
/// ```
pub mod reference_db;
