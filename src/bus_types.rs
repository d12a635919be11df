use crate::network::{BusType, Network};

/// Internal bus indexes grouped by the role they play in the power flow.
#[derive(Debug, Clone, Default)]
pub struct BusTypes {
    pub refs: Vec<usize>,
    pub pv: Vec<usize>,
    pub pq: Vec<usize>,
    pub dc: Vec<usize>,
    /// Buses in de-energized islands. They keep their initial voltage.
    pub isolated: Vec<usize>,
}

/// Builds index lists for each type of bus (REF, PV, PQ, DC).
///
/// PV buses without an in-service generator have already been demoted to
/// PQ by the network builder, and islands without a slack bus have had
/// one promoted.
pub fn bus_types(net: &Network) -> BusTypes {
    let mut bt = BusTypes::default();
    for (i, b) in net.buses().iter().enumerate() {
        if net.isolated()[i] {
            bt.isolated.push(i);
        } else if b.is_dc {
            bt.dc.push(i);
        } else {
            match net.bus_types()[i] {
                BusType::Slack => bt.refs.push(i),
                BusType::PV => bt.pv.push(i),
                BusType::PQ => bt.pq.push(i),
            }
        }
    }
    bt
}

impl BusTypes {
    /// Converts PV bus `i` to PQ.
    pub(crate) fn pv_to_pq(&mut self, i: usize) {
        self.pv.retain(|&k| k != i);
        self.pq.push(i);
        self.pq.sort_unstable();
    }
}
