//! Behavioural scenarios for protection flows over the share plugin.

mod flow;
